/// Which environment-specific settings file to layer on top of `base`.
/// Mirrors `crates/control::config::app_env`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Local,
    Test,
    Production,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Local => "local",
            AppEnv::Test => "test",
            AppEnv::Production => "production",
        }
    }
}

pub fn app_env() -> AppEnv {
    match std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .to_lowercase()
        .as_str()
    {
        "test" => AppEnv::Test,
        "production" | "prod" => AppEnv::Production,
        _ => AppEnv::Local,
    }
}
