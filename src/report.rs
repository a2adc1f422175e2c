//! Final provisioning report: where to reach what was just launched.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::provision::StepRecord;

/// Database connection summary. The password is never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSummary {
    /// `host:port` of the published database port.
    pub endpoint: String,
    pub user: String,
    pub database: String,
    #[serde(skip)]
    password: String,
}

impl DatabaseSummary {
    /// `postgresql://` URL, with the password masked unless `reveal` is set.
    pub fn connection_url(&self, reveal: bool) -> String {
        let password = if reveal { self.password.as_str() } else { "****" };
        format!(
            "postgresql://{}:{}@{}/{}",
            self.user, password, self.endpoint, self.database
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub serving_endpoint: String,
    pub model: String,
    pub database: DatabaseSummary,
    pub admin_ui_endpoint: String,
    pub steps: Vec<StepRecord>,
}

impl Report {
    pub fn new(run_id: Uuid, config: &Config, steps: Vec<StepRecord>) -> Self {
        let creds = &config.database.credentials;
        Self {
            run_id,
            serving_endpoint: config.serving_endpoint(),
            model: config.serving.model_name.clone(),
            database: DatabaseSummary {
                endpoint: config.database_endpoint(),
                user: creds.user.clone(),
                database: creds.db_name.clone(),
                password: creds.password.clone(),
            },
            admin_ui_endpoint: config.admin_ui_endpoint(),
            steps,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Provisioning complete.")?;
        writeln!(f, "  Inference API : {}", self.serving_endpoint)?;
        writeln!(f, "  Model         : {}", self.model)?;
        writeln!(
            f,
            "  Database      : {} (database {}, user {})",
            self.database.endpoint, self.database.database, self.database.user
        )?;
        writeln!(f, "                  {}", self.database.connection_url(false))?;
        write!(f, "  Admin UI      : {}", self.admin_ui_endpoint)
    }
}
