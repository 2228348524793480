use std::env;

/// Application configuration, read once at startup.
///
/// Only `DATABASE_URL` is mandatory; everything else falls back to a
/// development default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Static application-wide secret appended to passwords before hashing.
    pub password_pepper: String,
    pub upload_dir: String,
    pub max_upload_bytes: usize,
}

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr =
            env::var("FITCLUB_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let password_pepper = match env::var("FITCLUB_PASSWORD_PEPPER") {
            Ok(p) => p,
            Err(_) => {
                warn!("FITCLUB_PASSWORD_PEPPER not set, using development default");
                "dev-pepper-change-in-production".to_string()
            }
        };
        let upload_dir =
            env::var("FITCLUB_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());
        let max_upload_bytes = env::var("FITCLUB_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        Ok(Config {
            database_url,
            bind_addr,
            password_pepper,
            upload_dir,
            max_upload_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_url_is_an_error() {
        env::remove_var("DATABASE_URL");
        assert!(Config::from_env().is_err());
    }
}
