use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Cleartext password check shared by every user and every tenant database.
/// The database name only selects the tenant; it never changes the password.
#[derive(Debug)]
pub struct CustodyAuthSource {
    password: Vec<u8>,
}

impl CustodyAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            password: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for CustodyAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!(user = ?login.user(), database = ?login.database(), "password lookup");
        Ok(Password::new(None, self.password.clone()))
    }
}
