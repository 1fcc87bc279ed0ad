use clap::{Parser, Subcommand};

use stiknes::{
    db::conn::DatabaseConnection, error::Error, settings::Settings,
    utils::systemtime_to_iso8601,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML file containing the program settings
    #[arg(short, long)]
    settings: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    ValidateSettings {
        /// Print out the parsed settings, with the database password masked
        #[arg(short = 'P', long, default_value_t = false)]
        print: bool,
    },
    /// Creates the users and notes tables if they do not exist yet
    SetupDatabase {},
    CheckDatabase {
        /// Print the most recently created users
        #[arg(short = 'U', long, default_value_t = false)]
        list_users: bool,

        /// Print a single user and their notes
        #[arg(long)]
        user: Option<i64>,
    },
}

fn main() -> Result<(), Error> {
    let args: Args = Args::parse();
    let s = Settings::load(&args.settings)?;
    s.setup_logging("manage")?;
    match args.command {
        Commands::ValidateSettings { print } => validate_settings(s, print),
        Commands::SetupDatabase {} => setup_database(s),
        Commands::CheckDatabase { list_users, user } => check_database(s, list_users, user),
    }
}

/// Loading the settings already validated them, so all that is left is to
/// show what was loaded.
fn validate_settings(s: Settings, print: bool) -> Result<(), Error> {
    if print {
        let mut masked = s.clone();
        masked.postgres.password = String::from("********");
        println!("{masked:#?}");
    }
    println!("Settings for {} are valid.", s.name);
    Ok(())
}

fn setup_database(s: Settings) -> Result<(), Error> {
    log::info!("SETTING UP DATABASE");
    let mut dbconn = DatabaseConnection::connect(&s)?;
    dbconn.setup_schema()?;
    log::info!("Database schema is in place");
    println!("Database {} is set up.", s.postgres.dbname);
    Ok(())
}

fn check_database(s: Settings, list_users: bool, user: Option<i64>) -> Result<(), Error> {
    log::info!("CHECKING DATABASE");

    log::debug!("Opening database connection");
    let mut dbconn = DatabaseConnection::connect(&s)?;
    dbconn.ping()?;

    println!("Users: {}", dbconn.count_users()?);
    println!("Notes: {}", dbconn.count_notes()?);

    if list_users {
        log::debug!("Fetching the newest users");
        match dbconn.list_users(0, s.pagination.max_limit) {
            Ok((users, total)) => {
                println!("Showing {} of {} users", users.len(), total);
                for (u, n_notes) in users.iter() {
                    println!(
                        "{:>6}  {:<32} {:<20} {:>4} notes  created {}",
                        u.id,
                        u.email,
                        u.username,
                        n_notes,
                        systemtime_to_iso8601(&u.created_at)
                    );
                }
            }
            Err(e) => {
                log::error!("Could not fetch users: {e}")
            }
        }
    }
    if let Some(user_id) = user {
        match dbconn.get_user(user_id) {
            Ok(Some(u)) => {
                println!("User {} <{}> ({})", u.username, u.email, u.id);
                for n in dbconn.user_notes(&u)?.iter() {
                    println!(
                        "  [{}] {} (updated {})",
                        n.id,
                        n.title,
                        systemtime_to_iso8601(&n.updated_at)
                    );
                }
            }
            Ok(None) => {
                println!("No user with id {user_id}");
            }
            Err(e) => {
                println!("Database error: {e}");
            }
        }
    }

    log::debug!("Done checking");
    Ok(())
}
