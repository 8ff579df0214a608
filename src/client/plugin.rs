//! Credential operations exposed to the host

use super::config::{ConfigMap, RawConfig};
use super::executor::{execute_statements, Substitutions};
use super::producer::ConnectionProducer;
use crate::connection::Connector;
use crate::metrics::labels;
use crate::username::{TemplateData, UsernameTemplate, DEFAULT_USERNAME_TEMPLATE};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Value returned by [`Database::type_name`]
pub const TYPE_NAME: &str = "clickhouse";

/// Used by delete when the request carries no statements
pub const DEFAULT_REVOCATION_STATEMENT: &str = "DROP USER IF EXISTS '{{name}}'";

/// Used by password rotation when the request carries no statements
pub const DEFAULT_ROTATION_STATEMENT: &str =
    "ALTER USER IF EXISTS '{{name}}' IDENTIFIED BY '{{password}}'";

/// Layout of the `{{expiration}}` placeholder, e.g. `2026-10-18 12:00:00+0000`
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// SQL templates supplied by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statements {
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Statements {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Inputs to username generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameMetadata {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role_name: String,
}

impl From<&UsernameMetadata> for TemplateData {
    fn from(metadata: &UsernameMetadata) -> Self {
        TemplateData {
            display_name: metadata.display_name.clone(),
            role_name: metadata.role_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub config: ConfigMap,
    #[serde(default)]
    pub verify_connection: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub config: ConfigMap,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct NewUserRequest {
    #[serde(default)]
    pub username_config: UsernameMetadata,
    #[serde(default)]
    pub statements: Statements,
    pub password: String,
    pub expiration: DateTime<FixedOffset>,
}

impl std::fmt::Debug for NewUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUserRequest")
            .field("username_config", &self.username_config)
            .field("statements", &self.statements.commands.len())
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserResponse {
    pub username: String,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ChangePassword {
    pub new_password: String,
    #[serde(default)]
    pub statements: Statements,
}

impl std::fmt::Debug for ChangePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePassword")
            .field("statements", &self.statements.commands.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeExpiration {
    pub new_expiration: DateTime<FixedOffset>,
    #[serde(default)]
    pub statements: Statements,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub username: String,
    #[serde(default)]
    pub password: Option<ChangePassword>,
    #[serde(default)]
    pub expiration: Option<ChangeExpiration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    pub username: String,
    #[serde(default)]
    pub statements: Statements,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUserResponse {}

/// Operations a credential-lifecycle host drives
#[async_trait]
pub trait Database: Send + Sync {
    /// Accept a configuration and optionally prove connectivity
    async fn initialize(&self, req: InitializeRequest) -> Result<InitializeResponse>;

    /// Create a user with a generated name
    async fn new_user(&self, req: NewUserRequest) -> Result<NewUserResponse>;

    /// Rotate a password; expiration changes are accepted and ignored
    async fn update_user(&self, req: UpdateUserRequest) -> Result<UpdateUserResponse>;

    /// Drop a user
    async fn delete_user(&self, req: DeleteUserRequest) -> Result<DeleteUserResponse>;

    /// Plugin type identifier
    fn type_name(&self) -> &'static str;

    /// Plugin build version
    fn plugin_version(&self) -> String;

    /// Values the host must redact from anything it emits
    fn secret_values(&self) -> HashMap<String, String>;

    /// Release the connection
    async fn close(&self) -> Result<()>;
}

/// ClickHouse implementation of [`Database`]
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> clickhouse_dbplugin::Result<()> {
/// use clickhouse_dbplugin::client::{ClickhousePlugin, Database, InitializeRequest};
/// use serde_json::json;
///
/// let plugin = ClickhousePlugin::with_defaults();
/// let config = json!({
///     "connection_url": "tcp://localhost:9000?username={{username}}&password={{password}}",
///     "username": "admin",
///     "password": "secret",
/// });
/// plugin
///     .initialize(InitializeRequest {
///         config: config.as_object().cloned().unwrap_or_default(),
///         verify_connection: true,
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ClickhousePlugin {
    producer: ConnectionProducer,
    default_username_template: String,
    username_template: RwLock<Option<Arc<UsernameTemplate>>>,
    version: String,
}

impl ClickhousePlugin {
    /// Plugin with a custom default username template
    pub fn new(default_username_template: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let default_username_template = default_username_template.into();
        if default_username_template.is_empty() {
            return Err(Error::Config("missing default username template".into()));
        }
        Ok(Self {
            producer: ConnectionProducer::new(),
            default_username_template,
            username_template: RwLock::new(None),
            version: version.into(),
        })
    }

    /// Plugin with the built-in username template and the crate version
    pub fn with_defaults() -> Self {
        Self {
            producer: ConnectionProducer::new(),
            default_username_template: DEFAULT_USERNAME_TEMPLATE.to_string(),
            username_template: RwLock::new(None),
            version: crate::VERSION.to_string(),
        }
    }

    /// Replace the connector used to open handles
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.producer = ConnectionProducer::with_connector(connector);
        self
    }

    /// The underlying producer
    pub fn producer(&self) -> &ConnectionProducer {
        &self.producer
    }

    fn generate_username(&self, metadata: &UsernameMetadata) -> Result<String> {
        let template = self
            .username_template
            .read()
            .clone()
            .ok_or(Error::NotInitialized)?;
        template.render(&TemplateData::from(metadata))
    }

    async fn change_password(&self, username: &str, change: &ChangePassword) -> Result<()> {
        if username.is_empty() || change.new_password.is_empty() {
            return Err(Error::InvalidInput(
                "must provide both username and password".into(),
            ));
        }

        let statements = if change.statements.is_empty() {
            vec![DEFAULT_ROTATION_STATEMENT.to_string()]
        } else {
            change.statements.commands.clone()
        };
        let substitutions = Substitutions::new()
            .with("name", username)
            .with("username", username)
            .with("password", change.new_password.as_str());

        execute_statements(&self.producer, &statements, &substitutions).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ClickhousePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickhousePlugin")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Record duration and outcome of one host operation
async fn observed<T, F>(operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    crate::metrics::histograms::operation_duration(operation, elapsed_ms);
    crate::metrics::counters::operation_completed(operation, result.is_ok());
    match &result {
        Ok(_) => tracing::debug!(operation, elapsed_ms, "operation completed"),
        // Errors may carry secrets; only the category is logged here
        Err(e) => {
            crate::metrics::counters::error(e.category());
            tracing::warn!(operation, elapsed_ms, category = e.category(), "operation failed");
        }
    }
    result
}

#[async_trait]
impl Database for ClickhousePlugin {
    async fn initialize(&self, req: InitializeRequest) -> Result<InitializeResponse> {
        let span = tracing::info_span!("initialize", verify_connection = req.verify_connection);
        observed(labels::OP_INITIALIZE, async {
            let raw = RawConfig::decode(&req.config)?;
            let source = if raw.username_template.is_empty() {
                self.default_username_template.as_str()
            } else {
                raw.username_template.as_str()
            };

            let template = UsernameTemplate::parse(source).map_err(|e| {
                Error::UsernameTemplate(format!("unable to initialize username template: {}", e))
            })?;
            template
                .render(&TemplateData::default())
                .map_err(|e| Error::UsernameTemplate(format!("invalid username template: {}", e)))?;
            *self.username_template.write() = Some(Arc::new(template));

            let config = self
                .producer
                .initialize(&req.config, req.verify_connection)
                .await?;
            Ok::<_, Error>(InitializeResponse { config })
        })
        .instrument(span)
        .await
    }

    async fn new_user(&self, req: NewUserRequest) -> Result<NewUserResponse> {
        let span = tracing::info_span!(
            "new_user",
            role = %req.username_config.role_name,
            username = tracing::field::Empty
        );
        observed(labels::OP_NEW_USER, async {
            if req.statements.is_empty() {
                return Err(Error::InvalidInput("empty creation statements".into()));
            }

            let username = self.generate_username(&req.username_config)?;
            tracing::Span::current().record("username", username.as_str());

            let expiration = req.expiration.format(EXPIRATION_FORMAT).to_string();
            let substitutions = Substitutions::new()
                .with("name", username.as_str())
                .with("username", username.as_str())
                .with("password", req.password.as_str())
                .with("expiration", expiration);

            execute_statements(&self.producer, &req.statements.commands, &substitutions).await?;
            Ok(NewUserResponse { username })
        })
        .instrument(span)
        .await
    }

    async fn update_user(&self, req: UpdateUserRequest) -> Result<UpdateUserResponse> {
        let span = tracing::info_span!(
            "update_user",
            username = %req.username,
            password = req.password.is_some(),
            expiration = req.expiration.is_some()
        );
        observed(labels::OP_UPDATE_USER, async {
            if req.password.is_none() && req.expiration.is_none() {
                return Err(Error::InvalidInput("no change requested".into()));
            }

            if let Some(change) = &req.password {
                self.change_password(&req.username, change)
                    .await
                    .map_err(|e| Error::PasswordChange(Box::new(e)))?;
            }

            if req.expiration.is_some() {
                tracing::debug!("expiration change ignored");
            }

            Ok(UpdateUserResponse {})
        })
        .instrument(span)
        .await
    }

    async fn delete_user(&self, req: DeleteUserRequest) -> Result<DeleteUserResponse> {
        let span = tracing::info_span!("delete_user", username = %req.username);
        observed(labels::OP_DELETE_USER, async {
            let statements = if req.statements.is_empty() {
                vec![DEFAULT_REVOCATION_STATEMENT.to_string()]
            } else {
                req.statements.commands.clone()
            };
            let substitutions = Substitutions::new()
                .with("name", req.username.as_str())
                .with("username", req.username.as_str());

            execute_statements(&self.producer, &statements, &substitutions).await?;
            Ok::<_, Error>(DeleteUserResponse {})
        })
        .instrument(span)
        .await
    }

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn plugin_version(&self) -> String {
        self.version.clone()
    }

    fn secret_values(&self) -> HashMap<String, String> {
        self.producer.secret_values()
    }

    async fn close(&self) -> Result<()> {
        observed(labels::OP_CLOSE, self.producer.close())
            .instrument(tracing::info_span!("close"))
            .await
    }
}
