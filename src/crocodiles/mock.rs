//! In-process stand-in for the Crocodiles API used by workload tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Duration;

use crate::engine::http_client::{HttpCollaborator, HttpError};
use crate::workload::http::{HttpRequest, HttpResponse, Method};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Croc {
    pub id: u64,
    pub name: String,
    pub sex: String,
    pub date_of_birth: String,
}

#[derive(Default)]
struct ApiState {
    users: HashMap<String, String>,
    tokens: HashMap<String, String>,
    logins: HashMap<String, usize>,
    crocs: BTreeMap<u64, (String, Croc)>,
    next_id: u64,
    updates: Vec<(Croc, Croc)>,
    issued: u64,
}

pub struct MockCrocodileApi {
    base_url: String,
    latency: Duration,
    state: Mutex<ApiState>,
}

impl MockCrocodileApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            latency: Duration::ZERO,
            state: Mutex::new(ApiState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.state
            .lock()
            .users
            .insert(username.to_string(), password.to_string());
        self
    }

    pub fn logins(&self, username: &str) -> usize {
        self.state.lock().logins.get(username).copied().unwrap_or(0)
    }

    pub fn crocs_of(&self, username: &str) -> Vec<Croc> {
        self.state
            .lock()
            .crocs
            .values()
            .filter(|(owner, _)| owner == username)
            .map(|(_, croc)| croc.clone())
            .collect()
    }

    /// Every PATCH as (before, after).
    pub fn updates(&self) -> Vec<(Croc, Croc)> {
        self.state.lock().updates.clone()
    }

    pub fn total_created(&self) -> u64 {
        self.state.lock().next_id - 1
    }

    /// Invalidate all issued tokens, as an expiry would.
    pub fn revoke_tokens(&self) {
        self.state.lock().tokens.clear();
    }

    fn owner(state: &ApiState, request: &HttpRequest) -> Option<String> {
        let token = request
            .header_value("Authorization")?
            .strip_prefix("Bearer ")?;
        state.tokens.get(token).cloned()
    }

    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let path = match request.url.strip_prefix(&self.base_url) {
            Some(path) => path,
            None => return HttpResponse::new(404, r#"{"detail":"Not found."}"#),
        };
        let mut state = self.state.lock();

        if path == "/auth/token/login/" && request.method == Method::Post {
            let username = request.form_value("username").unwrap_or_default();
            let password = request.form_value("password").unwrap_or_default();
            if state.users.get(username).map(String::as_str) != Some(password) {
                return HttpResponse::new(
                    401,
                    r#"{"detail":"No active account found with the given credentials"}"#,
                );
            }
            state.issued += 1;
            let token = format!("access-{}-{}", username, state.issued);
            state.tokens.insert(token.clone(), username.to_string());
            *state.logins.entry(username.to_string()).or_default() += 1;
            return HttpResponse::new(200, json!({ "access": token, "refresh": "r" }).to_string());
        }

        if path == "/public/crocodiles/" && request.method == Method::Get {
            let public: Vec<_> = (1..=8)
                .map(|id| json!({ "id": id, "name": format!("Croc {}", id), "sex": "M" }))
                .collect();
            return HttpResponse::new(200, json!(public).to_string());
        }

        let rest = match path.strip_prefix("/my/crocodiles/") {
            Some(rest) => rest,
            None => return HttpResponse::new(404, r#"{"detail":"Not found."}"#),
        };
        let owner = match Self::owner(&state, request) {
            Some(owner) => owner,
            None => {
                return HttpResponse::new(
                    401,
                    r#"{"detail":"Given token not valid for any token type"}"#,
                )
            }
        };

        if rest.is_empty() {
            return match request.method {
                Method::Get => {
                    let mine: Vec<&Croc> = state
                        .crocs
                        .values()
                        .filter(|(o, _)| *o == owner)
                        .map(|(_, c)| c)
                        .collect();
                    HttpResponse::new(200, json!(mine).to_string())
                }
                Method::Post => {
                    let id = state.next_id;
                    state.next_id += 1;
                    let croc = Croc {
                        id,
                        name: request.form_value("name").unwrap_or_default().to_string(),
                        sex: request.form_value("sex").unwrap_or_default().to_string(),
                        date_of_birth: request
                            .form_value("date_of_birth")
                            .unwrap_or_default()
                            .to_string(),
                    };
                    let body = json!(croc).to_string();
                    state.crocs.insert(id, (owner, croc));
                    HttpResponse::new(201, body)
                }
                _ => HttpResponse::new(405, ""),
            };
        }

        let id: u64 = match rest.trim_end_matches('/').parse() {
            Ok(id) => id,
            Err(_) => return HttpResponse::new(404, r#"{"detail":"Not found."}"#),
        };
        let mine = matches!(state.crocs.get(&id), Some((o, _)) if *o == owner);
        if !mine {
            return HttpResponse::new(404, r#"{"detail":"Not found."}"#);
        }

        match request.method {
            Method::Get => {
                let croc = &state.crocs[&id].1;
                HttpResponse::new(200, json!(croc).to_string())
            }
            Method::Patch => {
                let before = state.crocs[&id].1.clone();
                let mut after = before.clone();
                if let Some(name) = request.form_value("name") {
                    after.name = name.to_string();
                }
                if let Some(sex) = request.form_value("sex") {
                    after.sex = sex.to_string();
                }
                let body = json!(after).to_string();
                state.updates.push((before, after.clone()));
                if let Some(entry) = state.crocs.get_mut(&id) {
                    entry.1 = after;
                }
                HttpResponse::new(200, body)
            }
            Method::Delete => {
                state.crocs.remove(&id);
                HttpResponse::new(204, "")
            }
            Method::Post => HttpResponse::new(405, ""),
        }
    }
}

#[async_trait]
impl HttpCollaborator for MockCrocodileApi {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.respond(request))
    }
}
