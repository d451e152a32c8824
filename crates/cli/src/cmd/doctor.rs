use buchschloss_core::config::{CONFIG_ENV, ConfigLoader, default_config_path};
use buchschloss_core::store::Database;
use std::path::{Path, PathBuf};

pub fn run(config: Option<&Path>) {
    let shown_path = config.map(Path::to_path_buf).unwrap_or_else(|| {
        std::env::var(CONFIG_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path)
    });

    let rc = match ConfigLoader::load(config) {
        Ok(rc) => rc,
        Err(e) => {
            println!("FAIL bsl doctor");
            println!("{e}");
            if config.is_none() {
                println!("looked for: {}", shown_path.display());
            }
            std::process::exit(1);
        }
    };
    crate::logging::init(&rc);

    println!("OK   bsl doctor");
    println!("path: {}", shown_path.display());
    println!("database: {}", rc.database_path.display());
    println!("levels: 0..={}", rc.scale().max);
    for level in 0..=rc.scale().max {
        println!("  {level}: {}", rc.level_name(level));
    }
    println!("auth.reauth_window: {}s", rc.auth.reauth_window.num_seconds());
    match &rc.url_pattern {
        Some(p) => println!("requests.url_pattern: {p}"),
        None => println!("requests.url_pattern: (none, all requests rejected)"),
    }
    println!("requests.timeout: {}s", rc.request_timeout.as_secs());
    println!("sandbox.memory_limit: {}", rc.sandbox.memory_limit);
    for entry in &rc.startup {
        println!("scripts.startup: {}", entry.name);
    }
    for entry in &rc.repeating {
        println!("scripts.repeating: {} every {}s", entry.name, entry.every.num_seconds());
    }

    if let Err(e) = Database::open(&rc.database_path) {
        println!("FAIL database: {e}");
        std::process::exit(1);
    }
}
