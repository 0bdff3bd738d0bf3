use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::{Actor, Role, UnknownVariant};

/// Startup `user` names carry the caller's identity as `<role>:<ulid>`.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum IdentityError {
    #[error("missing user name")]
    Missing,
    #[error("user name must be <role>:<ulid>")]
    Malformed,
    #[error(transparent)]
    Role(#[from] UnknownVariant),
    #[error("bad user id: {0}")]
    Id(#[from] ulid::DecodeError),
}

pub fn parse_identity(user: Option<&str>) -> Result<Actor, IdentityError> {
    let user = user.ok_or(IdentityError::Missing)?;
    let (role, id) = user.split_once(':').ok_or(IdentityError::Malformed)?;
    let role: Role = role.parse()?;
    let id = Ulid::from_string(id.trim())?;
    Ok(Actor { id, role })
}

pub fn identity_err(e: IdentityError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".into(),
        "28000".into(),
        format!("invalid identity: {e}"),
    )))
}

/// Shared password for every identity. Malformed identities are refused
/// before the password exchange.
#[derive(Debug)]
pub struct ParkspaceAuthSource {
    password: String,
}

impl ParkspaceAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ParkspaceAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().map(|u| u.to_string());
        let user = user.as_deref();
        if let Err(e) = parse_identity(user) {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::debug!("rejecting login {user:?}: {e}");
            return Err(identity_err(e));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
