//! # Database Principal Provisioning
//!
//! Provisions the one external dependency Terraform does not model: the Azure
//! SQL login for the app, owned by the app's service principal.
//!
//! Both statements are idempotent. The user is only created when it does not
//! already exist (an explicit existence check, so no provider-specific
//! duplicate error ever surfaces), and re-granting `db_owner` to a member is a
//! no-op on the server side.

use crate::config::Settings;
use crate::error::Result;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// Database name for an app identifier
pub fn database_name(identifier: &str) -> String {
    format!("{identifier}-db")
}

/// Database username for an app identifier
pub fn app_username(identifier: &str) -> String {
    format!("{identifier}-app")
}

/// Conditional CREATE USER, guarded by a `sys.database_principals` lookup
pub fn create_user_sql(username: &str) -> String {
    format!(
        "IF NOT EXISTS(SELECT principal_id FROM sys.database_principals WHERE name = '{literal}') BEGIN\n    CREATE USER [{bracketed}] FROM EXTERNAL PROVIDER;\nEND",
        literal = escape_literal(username),
        bracketed = escape_bracketed(username),
    )
}

/// Ownership grant for the app user
pub fn grant_owner_sql(username: &str) -> String {
    format!(
        "EXEC sp_addrolemember 'db_owner', [{}];",
        escape_bracketed(username)
    )
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn escape_bracketed(value: &str) -> String {
    value.replace(']', "]]")
}

/// Client for one app database on the configured logical server,
/// authenticated with an AAD service-principal token
pub struct SqlPrincipalClient {
    client: Client<Compat<TcpStream>>,
}

impl std::fmt::Debug for SqlPrincipalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlPrincipalClient").finish_non_exhaustive()
    }
}

impl SqlPrincipalClient {
    /// Connect to `<server>.database.windows.net` scoped to the app database.
    /// The token must carry the `https://database.windows.net/.default` scope.
    pub async fn connect(settings: &Settings, database: &str, token: String) -> Result<Self> {
        let host = format!("{}.database.windows.net", settings.default_sql_server);
        let mut config = Config::new();
        config.host(&host);
        config.port(1433);
        config.database(database);
        config.authentication(AuthMethod::aad_token(token));
        config.encryption(EncryptionLevel::Required);

        debug!(host, database, "connecting to sql server");
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(Self { client })
    }

    /// Verify the database answers before running statements
    pub async fn ping(&mut self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?.into_results().await?;
        Ok(())
    }

    /// Create the external-provider user if it does not already exist
    pub async fn create_user(&mut self, username: &str) -> Result<()> {
        self.ping().await?;
        info!(username, "ensuring database user");
        self.client
            .simple_query(create_user_sql(username))
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    /// Grant `db_owner` to the app user
    pub async fn grant_owner(&mut self, username: &str) -> Result<()> {
        self.ping().await?;
        info!(username, "granting db_owner");
        self.client
            .simple_query(grant_owner_sql(username))
            .await?
            .into_results()
            .await?;
        Ok(())
    }
}
