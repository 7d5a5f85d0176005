use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user session bound to a cookie id.
///
/// The authentication triplet (database, user id, login) is all-or-nothing;
/// everything else lives in the free-form `data` mapping or the `context`
/// mapping. Any observable mutation sets `is_dirty`, which drives
/// save-on-response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub sid: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub db_name: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub login: String,

    #[serde(default)]
    pub context: Map<String, Value>,

    #[serde(skip)]
    pub is_dirty: bool,
    #[serde(skip)]
    pub is_new: bool,
    #[serde(skip)]
    pub should_rotate: bool,
    #[serde(skip)]
    pub can_save: bool,
}

fn default_context() -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("lang".to_string(), Value::String("en_US".to_string()));
    context.insert("tz".to_string(), Value::String("UTC".to_string()));
    context.insert("timezone".to_string(), Value::String("UTC".to_string()));
    context
}

impl Session {
    pub fn new(sid: String) -> Self {
        let now = Utc::now();
        Self {
            sid,
            data: Map::new(),
            created_at: now,
            last_accessed: now,
            db_name: String::new(),
            user_id: 0,
            login: String::new(),
            context: default_context(),
            is_dirty: false,
            is_new: true,
            should_rotate: false,
            can_save: true,
        }
    }

    /// Read a value. The special keys `db_name`/`db`, `user_id`/`uid` and
    /// `login` route to the typed authentication fields.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "db_name" | "db" => {
                (!self.db_name.is_empty()).then(|| Value::String(self.db_name.clone()))
            }
            "user_id" | "uid" => (self.user_id != 0).then(|| Value::from(self.user_id)),
            "login" => (!self.login.is_empty()).then(|| Value::String(self.login.clone())),
            _ => self.data.get(key).cloned(),
        }
    }

    /// Store a value, routing special keys to the typed fields. A write that
    /// doesn't change the stored value leaves `is_dirty` untouched.
    pub fn set(&mut self, key: &str, value: Value) {
        match key {
            "db_name" | "db" => {
                if let Value::String(name) = value {
                    if self.db_name != name {
                        self.db_name = name;
                        self.is_dirty = true;
                    }
                }
            }
            "user_id" | "uid" => {
                if let Some(id) = value.as_i64() {
                    if self.user_id != id {
                        self.user_id = id;
                        self.is_dirty = true;
                    }
                }
            }
            "login" => {
                if let Value::String(login) = value {
                    if self.login != login {
                        self.login = login;
                        self.is_dirty = true;
                    }
                }
            }
            _ => {
                if self.data.get(key) != Some(&value) {
                    self.data.insert(key.to_string(), value);
                    self.is_dirty = true;
                }
            }
        }
    }

    pub fn remove(&mut self, key: &str) {
        match key {
            "db_name" | "db" => {
                self.db_name.clear();
                self.is_dirty = true;
            }
            "user_id" | "uid" => {
                self.user_id = 0;
                self.is_dirty = true;
            }
            "login" => {
                self.login.clear();
                self.is_dirty = true;
            }
            _ => {
                if self.data.remove(key).is_some() {
                    self.is_dirty = true;
                }
            }
        }
    }

    /// Drop all data and reset the context to its defaults.
    pub fn clear(&mut self) {
        self.data = Map::new();
        self.db_name.clear();
        self.user_id = 0;
        self.login.clear();
        self.context = default_context();
        self.is_dirty = true;
    }

    /// Store the authentication triplet, mirroring it into the context.
    pub fn authenticate(&mut self, db_name: &str, login: &str, user_id: i64) {
        self.db_name = db_name.to_string();
        self.login = login.to_string();
        self.user_id = user_id;
        self.is_dirty = true;

        self.context
            .insert("db_name".to_string(), Value::String(db_name.to_string()));
        self.context
            .insert("user_id".to_string(), Value::from(user_id));
        self.context
            .insert("login".to_string(), Value::String(login.to_string()));
    }

    /// Clear authentication; `keep_db` retains the database binding.
    pub fn logout(&mut self, keep_db: bool) {
        if !keep_db {
            self.db_name.clear();
            self.context.remove("db_name");
        }

        self.user_id = 0;
        self.login.clear();
        self.is_dirty = true;

        self.context.remove("user_id");
        self.context.remove("login");
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id != 0 && !self.login.is_empty()
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.is_dirty = true;
    }

    pub fn update_context(&mut self, updates: Map<String, Value>) {
        for (key, value) in updates {
            self.context.insert(key, value);
        }
        self.is_dirty = true;
    }

    pub fn context(&self) -> Map<String, Value> {
        self.context.clone()
    }
}
