use crate::{
    auth::TokenError, eid::Eid, images::ImageError, items::InvalidItem, users::UserError,
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("auth token is missing")]
    MissingToken,

    #[error("unauthorized access")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{step} failed: {source:#}")]
    Downstream {
        step: &'static str,
        source: anyhow::Error,
    },

    /// The item was committed; only matching failed and can be retried.
    #[error("item {item_id} was saved but matching failed: {cause}")]
    MatchPhase {
        item_id: Eid,
        #[source]
        cause: Box<AppError>,
    },
}

impl AppError {
    pub fn downstream(step: &'static str, source: impl Into<anyhow::Error>) -> Self {
        AppError::Downstream {
            step,
            source: source.into(),
        }
    }
}

impl From<InvalidItem> for AppError {
    fn from(err: InvalidItem) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        log::debug!("rejected token: {err}");
        AppError::Unauthorized
    }
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::AlreadyExists(mail) => AppError::Conflict(format!("a user with mail {mail} already exists")),
            UserError::Invalid(reason) => AppError::Validation(reason.to_string()),
            UserError::Other(err) => AppError::downstream("user directory", err),
        }
    }
}
