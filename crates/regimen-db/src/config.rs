use std::env;

/// Connection settings for the regimen database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Pool size. Expansion and retraction each hold one connection for the
    /// length of their transaction.
    pub max_connections: u32,
}

impl DbConfig {
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/regimen";
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

    /// `REGIMEN_DATABASE_URL` and `REGIMEN_DB_MAX_CONNECTIONS`, with defaults
    /// for whichever is unset or unparseable.
    pub fn from_env() -> Self {
        let database_url =
            env::var("REGIMEN_DATABASE_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        let max_connections = env::var("REGIMEN_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(Self::DEFAULT_MAX_CONNECTIONS);
        Self {
            database_url,
            max_connections,
        }
    }

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// `(server part, database name)`; the query string is dropped from the
    /// name.
    fn split_url(&self) -> (&str, &str) {
        match self.database_url.rsplit_once('/') {
            Some((server, tail)) => (server, tail.split('?').next().unwrap_or(tail)),
            None => (self.database_url.as_str(), ""),
        }
    }

    /// Database name from the URL, if it has one.
    pub fn database_name(&self) -> Option<&str> {
        Some(self.split_url().1).filter(|name| !name.is_empty())
    }

    /// Same server, `postgres` maintenance database. `CREATE DATABASE` is
    /// issued from here.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rsplit_once('/') {
            Some(_) => format!("{}/postgres", self.split_url().0),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
