use actix_cors::Cors;
use actix_web::{
    http::header,
    middleware::{Logger, NormalizePath},
    web, App, HttpServer,
};
use stiknes::{db::conn::build_pool, error::Error, settings::Settings};

use clap::Parser;

mod api;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML file containing the program settings
    #[arg(short, long)]
    settings: String,
}

/// CORS policy for the browser frontend. An empty origin list in the
/// settings lets any origin through.
fn cors(s: &Settings) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600);
    if s.server.cors_allowed_origins.is_empty() {
        cors.allow_any_origin()
    } else {
        s.server
            .cors_allowed_origins
            .iter()
            .fold(cors, |c, origin| c.allowed_origin(origin))
    }
}

#[actix_web::main]
async fn main() -> Result<(), Error> {
    let args: Args = Args::parse();
    let s = Settings::load(&args.settings)?;
    s.setup_logging("server")?;
    log::info!(
        "Starting {} on {}:{}",
        s.name,
        s.server.address,
        s.server.port
    );
    let pool = build_pool(&s);
    let s_clone1 = s.clone();
    HttpServer::new(move || {
        let s = s_clone1.clone();
        App::new()
            .wrap(cors(&s))
            .wrap(NormalizePath::trim())
            .wrap(Logger::default())
            .configure(|cfg| api::config(cfg, &s, &pool))
            .default_service(web::to(api::not_found))
    })
    .bind((s.server.address.clone(), s.server.port))?
    .run()
    .await
    .map_err(Error::from)
}
