use uuid::Uuid;

/// Authenticated caller context. Identity verification is the backend's
/// concern; the pipeline only requires that a user and a session bearer
/// token exist, which this type guarantees by construction.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: Uuid,
    pub access_token: String,
}

impl UserSession {
    pub fn new(user_id: Uuid, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
        }
    }
}
