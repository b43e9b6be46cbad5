use crate::eid::Eid;
use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    sync::{Arc, RwLock},
    time::Instant,
};

/// Whether a report describes something lost or something found.
///
/// Serialized as the boolean flag clients send: `true` = lost, `false` = found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum ReportState {
    Lost,
    Found,
}

impl ReportState {
    pub fn is_lost(self) -> bool {
        matches!(self, ReportState::Lost)
    }

    pub fn opposite(self) -> Self {
        match self {
            ReportState::Lost => ReportState::Found,
            ReportState::Found => ReportState::Lost,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReportState::Lost => "lost",
            ReportState::Found => "found",
        }
    }
}

impl From<bool> for ReportState {
    fn from(flag: bool) -> Self {
        if flag {
            ReportState::Lost
        } else {
            ReportState::Found
        }
    }
}

impl From<ReportState> for bool {
    fn from(state: ReportState) -> Self {
        state.is_lost()
    }
}

#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Eid,

    pub owner_mail: String,
    pub name: String,
    pub state: ReportState,
    pub description: String,

    /// Empty only while the ingestion saga is still running.
    pub image_url: String,
    pub created_at: i64,

    #[serde(default)]
    pub matches: Vec<Eid>,
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct InvalidItem(pub &'static str);

/// A validated report waiting to be inserted.
#[derive(Debug, Clone)]
pub struct NewItem {
    owner_mail: String,
    name: String,
    state: ReportState,
    description: String,
    created_at: i64,
}

impl NewItem {
    /// Rejects blank required fields before anything touches a store.
    pub fn new(
        owner_mail: &str,
        name: &str,
        state: ReportState,
        description: &str,
        created_at: i64,
    ) -> Result<Self, InvalidItem> {
        let owner_mail = owner_mail.trim();
        let name = name.trim();
        let description = description.trim();

        if owner_mail.is_empty() {
            return Err(InvalidItem("owner is required"));
        }
        if name.is_empty() {
            return Err(InvalidItem("name is required"));
        }
        if description.is_empty() {
            return Err(InvalidItem("description is required"));
        }
        if created_at < 0 {
            return Err(InvalidItem("timestamp must not be negative"));
        }

        Ok(Self {
            owner_mail: owner_mail.to_string(),
            name: name.to_string(),
            state,
            description: description.to_string(),
            created_at,
        })
    }

    pub fn owner_mail(&self) -> &str {
        &self.owner_mail
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ReportState {
        self.state
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub owner: Option<String>,
    pub exclude_owner: Option<String>,
    pub ids: Option<Vec<Eid>>,
    /// Skip records whose image is not attached yet.
    pub committed_only: bool,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl ItemQuery {
    fn accepts(&self, item: &Item) -> bool {
        if let Some(owner) = &self.owner {
            if &item.owner_mail != owner {
                return false;
            }
        }
        if let Some(excluded) = &self.exclude_owner {
            if &item.owner_mail == excluded {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&item.id) {
                return false;
            }
        }
        if self.committed_only && item.image_url.is_empty() {
            return false;
        }
        true
    }
}

/// Item records. Every mutation is atomic per call; nothing groups several
/// calls into one transaction.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, item: NewItem) -> anyhow::Result<Item>;
    async fn get(&self, id: &Eid) -> anyhow::Result<Option<Item>>;
    async fn set_image_url(&self, id: &Eid, url: &str) -> anyhow::Result<bool>;
    /// Replaces the whole `matches` list.
    async fn set_matches(&self, id: &Eid, matches: Vec<Eid>) -> anyhow::Result<bool>;
    /// Appends one entry to `matches`.
    async fn push_match(&self, id: &Eid, matched: &Eid) -> anyhow::Result<bool>;
    /// Removes every occurrence of `matched` from one item.
    async fn pull_match(&self, id: &Eid, matched: &Eid) -> anyhow::Result<bool>;
    /// Removes `matched` from every item that references it. Returns the number of items changed.
    async fn pull_match_everywhere(&self, matched: &Eid) -> anyhow::Result<usize>;
    async fn delete(&self, id: &Eid) -> anyhow::Result<bool>;
    async fn search(&self, query: ItemQuery) -> anyhow::Result<Vec<Item>>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendCsv {
    list: Arc<RwLock<Vec<Item>>>,
    path: String,
}

const CSV_HEADERS: [&str; 8] = [
    "id",
    "owner_mail",
    "name",
    "state",
    "description",
    "image_url",
    "created_at",
    "matches",
];

fn parse_ids(raw: &str) -> Vec<Eid> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(Eid::from_stored)
        .collect()
}

fn join_ids(ids: &[Eid]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

impl BackendCsv {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new item collection at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut items = vec![];
        for record in csv_reader.records() {
            let record = record?;
            let field = |idx: usize, name: &str| {
                record
                    .get(idx)
                    .map(str::to_string)
                    .ok_or(anyhow!("couldnt get record {name}"))
            };

            items.push(Item {
                id: Eid::from_stored(&field(0, "id")?),
                owner_mail: field(1, "owner_mail")?,
                name: field(2, "name")?,
                state: ReportState::from(field(3, "state")?.parse::<bool>()?),
                description: field(4, "description")?,
                image_url: field(5, "image_url")?,
                created_at: field(6, "created_at")?.parse::<i64>()?,
                matches: parse_ids(&field(7, "matches")?),
            });
        }

        log::debug!(
            "took {}ms to read {} items",
            now.elapsed().as_micros() as f64 / 1000.0,
            items.len()
        );

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(items)),
            path: path.to_string(),
        })
    }

    fn write_snapshot(&self, items: &[Item]) -> anyhow::Result<()> {
        let temp_path = format!("{}-tmp", &self.path);
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for item in items {
            csv_wrt.write_record([
                item.id.as_str(),
                &item.owner_mail,
                &item.name,
                &bool::from(item.state).to_string(),
                &item.description,
                &item.image_url,
                &item.created_at.to_string(),
                &join_ids(&item.matches),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Applies `change` to a copy of the collection, persists the copy and only
    /// then publishes it, so a failed write leaves memory and disk unchanged.
    fn commit<R>(&self, change: impl FnOnce(&mut Vec<Item>) -> R) -> anyhow::Result<R> {
        let mut items = self
            .list
            .write()
            .map_err(|err| anyhow!("item list lock poisoned: {err}"))?;

        let mut next = items.clone();
        let result = change(&mut next);
        self.write_snapshot(&next)?;
        *items = next;

        Ok(result)
    }

    fn update_one(&self, id: &Eid, change: impl FnOnce(&mut Item)) -> anyhow::Result<bool> {
        self.commit(|items| match items.iter_mut().find(|item| &item.id == id) {
            Some(item) => {
                change(item);
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl DocumentStore for BackendCsv {
    async fn create(&self, item: NewItem) -> anyhow::Result<Item> {
        let item = Item {
            id: Eid::new(),
            owner_mail: item.owner_mail,
            name: item.name,
            state: item.state,
            description: item.description,
            image_url: String::new(),
            created_at: item.created_at,
            matches: vec![],
        };

        let created = item.clone();
        self.commit(move |items| items.push(item))?;

        Ok(created)
    }

    async fn get(&self, id: &Eid) -> anyhow::Result<Option<Item>> {
        let items = self
            .list
            .read()
            .map_err(|err| anyhow!("item list lock poisoned: {err}"))?;

        Ok(items.iter().find(|item| &item.id == id).cloned())
    }

    async fn set_image_url(&self, id: &Eid, url: &str) -> anyhow::Result<bool> {
        self.update_one(id, |item| item.image_url = url.to_string())
    }

    async fn set_matches(&self, id: &Eid, matches: Vec<Eid>) -> anyhow::Result<bool> {
        self.update_one(id, move |item| item.matches = matches)
    }

    async fn push_match(&self, id: &Eid, matched: &Eid) -> anyhow::Result<bool> {
        self.update_one(id, |item| item.matches.push(matched.clone()))
    }

    async fn pull_match(&self, id: &Eid, matched: &Eid) -> anyhow::Result<bool> {
        self.update_one(id, |item| item.matches.retain(|m| m != matched))
    }

    async fn pull_match_everywhere(&self, matched: &Eid) -> anyhow::Result<usize> {
        self.commit(|items| {
            let mut changed = 0;
            for item in items.iter_mut() {
                let before = item.matches.len();
                item.matches.retain(|m| m != matched);
                if item.matches.len() != before {
                    changed += 1;
                }
            }
            changed
        })
    }

    async fn delete(&self, id: &Eid) -> anyhow::Result<bool> {
        self.commit(|items| match items.iter().position(|item| &item.id == id) {
            Some(idx) => {
                items.remove(idx);
                true
            }
            None => false,
        })
    }

    async fn search(&self, query: ItemQuery) -> anyhow::Result<Vec<Item>> {
        let items = self
            .list
            .read()
            .map_err(|err| anyhow!("item list lock poisoned: {err}"))?;

        let matching = items.iter().filter(|item| query.accepts(item)).skip(query.skip);

        Ok(match query.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        })
    }
}
