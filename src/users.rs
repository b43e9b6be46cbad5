//! Account records consumed by the matching pipeline.
//!
//! Registration and password login live outside this service; all that is
//! needed here is to resolve a token subject to an owner identity and to find
//! the push token and contact details of an item's owner.

use crate::eid::Eid;
use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    sync::{Arc, RwLock},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Eid,
    pub name: String,
    pub mail: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub mail: String,
    pub phone: String,
}

#[derive(thiserror::Error, Debug)]
pub enum UserError {
    #[error("a user with mail {0} already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: &Eid) -> anyhow::Result<Option<User>>;
    async fn find_by_mail(&self, mail: &str) -> anyhow::Result<Option<User>>;
    async fn create(&self, user: NewUser) -> Result<User, UserError>;
    async fn set_push_token(&self, id: &Eid, token: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct UsersCsv {
    list: Arc<RwLock<Vec<User>>>,
    path: String,
}

const CSV_HEADERS: [&str; 5] = ["id", "name", "mail", "phone", "push_token"];

impl UsersCsv {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new user collection at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let mut csv_reader = csv::Reader::from_path(path)?;
        let mut users = vec![];
        for record in csv_reader.records() {
            let record = record?;
            let field = |idx: usize, name: &str| {
                record
                    .get(idx)
                    .map(str::to_string)
                    .ok_or(anyhow!("couldnt get user {name}"))
            };

            let push_token = field(4, "push_token")?;
            users.push(User {
                id: Eid::from_stored(&field(0, "id")?),
                name: field(1, "name")?,
                mail: field(2, "mail")?,
                phone: field(3, "phone")?,
                push_token: if push_token.is_empty() {
                    None
                } else {
                    Some(push_token)
                },
            });
        }

        Ok(UsersCsv {
            list: Arc::new(RwLock::new(users)),
            path: path.to_string(),
        })
    }

    fn write_snapshot(&self, users: &[User]) -> anyhow::Result<()> {
        let temp_path = format!("{}-tmp", &self.path);
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for user in users {
            csv_wrt.write_record([
                user.id.as_str(),
                &user.name,
                &user.mail,
                &user.phone,
                user.push_token.as_deref().unwrap_or_default(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for UsersCsv {
    async fn get(&self, id: &Eid) -> anyhow::Result<Option<User>> {
        let users = self
            .list
            .read()
            .map_err(|err| anyhow!("user list lock poisoned: {err}"))?;
        Ok(users.iter().find(|u| &u.id == id).cloned())
    }

    async fn find_by_mail(&self, mail: &str) -> anyhow::Result<Option<User>> {
        let users = self
            .list
            .read()
            .map_err(|err| anyhow!("user list lock poisoned: {err}"))?;
        Ok(users
            .iter()
            .find(|u| u.mail.eq_ignore_ascii_case(mail))
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, UserError> {
        let mail = user.mail.trim().to_lowercase();
        if mail.is_empty() || !mail.contains('@') {
            return Err(UserError::Invalid("a valid mail address is required"));
        }
        if user.name.trim().is_empty() {
            return Err(UserError::Invalid("name is required"));
        }

        let mut users = self
            .list
            .write()
            .map_err(|err| anyhow!("user list lock poisoned: {err}"))?;

        if users.iter().any(|u| u.mail == mail) {
            return Err(UserError::AlreadyExists(mail));
        }

        let created = User {
            id: Eid::new(),
            name: user.name.trim().to_string(),
            mail,
            phone: user.phone.trim().to_string(),
            push_token: None,
        };

        let mut next = users.clone();
        next.push(created.clone());
        self.write_snapshot(&next)?;
        *users = next;

        Ok(created)
    }

    async fn set_push_token(&self, id: &Eid, token: &str) -> anyhow::Result<bool> {
        let mut users = self
            .list
            .write()
            .map_err(|err| anyhow!("user list lock poisoned: {err}"))?;

        let mut next = users.clone();
        let Some(user) = next.iter_mut().find(|u| &u.id == id) else {
            return Ok(false);
        };
        user.push_token = Some(token.to_string());

        self.write_snapshot(&next)?;
        *users = next;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(mail: &str) -> NewUser {
        NewUser {
            name: "Sam".to_string(),
            mail: mail.to_string(),
            phone: "+15550001111".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.csv");
        let users = UsersCsv::load(path.to_str().unwrap()).unwrap();

        let user = users.create(new_user("Sam@X.io")).await.unwrap();
        assert_eq!(user.mail, "sam@x.io");
        assert_eq!(users.get(&user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(users.find_by_mail("SAM@x.io").await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_duplicate_mail_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.csv");
        let users = UsersCsv::load(path.to_str().unwrap()).unwrap();

        users.create(new_user("a@x")).await.unwrap();
        let result = users.create(new_user("a@x")).await;
        assert!(matches!(result, Err(UserError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_push_token_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.csv");
        let path = path.to_str().unwrap();

        let users = UsersCsv::load(path).unwrap();
        let user = users.create(new_user("a@x")).await.unwrap();
        assert!(users.set_push_token(&user.id, "ExponentPushToken[abc]").await.unwrap());
        assert!(!users.set_push_token(&Eid::new(), "x").await.unwrap());

        let reloaded = UsersCsv::load(path).unwrap();
        let user = reloaded.get(&user.id).await.unwrap().unwrap();
        assert_eq!(user.push_token.as_deref(), Some("ExponentPushToken[abc]"));
    }
}
