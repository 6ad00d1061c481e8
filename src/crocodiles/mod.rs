//! Workloads for the Crocodiles sample API.
//!
//! `standardWorkloadMix` is the steady private-API flow: log in once per
//! worker, then create, list, rename and delete a crocodile with think time
//! between steps. `spikeWorkload` is a single public listing used for the
//! arrival-rate spike.

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Duration;

use crate::cli::config::{Config, ConfigError, TokenRefresh};
use crate::engine::Engine;
use crate::utils::random_string;
use crate::workload::http::{HttpRequest, HttpResponse};
use crate::workload::{group, Vu, Workload};

#[cfg(test)]
pub(crate) mod mock;

pub const STANDARD_WORKLOAD_MIX: &str = "standardWorkloadMix";
pub const SPIKE_WORKLOAD: &str = "spikeWorkload";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrocodileOptions {
    pub base_url: String,
    pub think_time: Duration,
    pub token_refresh: TokenRefresh,
}

impl CrocodileOptions {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.base_url()?,
            think_time: config.think_time()?,
            token_refresh: config.token_refresh(),
        })
    }
}

/// Register both workloads under the names scenarios refer to in `exec`.
pub fn register(engine: &mut Engine, options: &CrocodileOptions) {
    engine
        .register(STANDARD_WORKLOAD_MIX, StandardWorkloadMix::new(options.clone()))
        .register(SPIKE_WORKLOAD, SpikeWorkload::new(&options.base_url));
}

fn non_empty_list(res: &HttpResponse) -> bool {
    matches!(res.json_value(), Some(Value::Array(items)) if !items.is_empty())
}

/// Worker-local state of the standard mix.
#[derive(Debug, Default)]
pub struct CrocState {
    /// Access token, fetched on the worker's first iteration.
    pub token: Option<String>,
}

pub struct StandardWorkloadMix {
    options: CrocodileOptions,
    private_url: String,
}

impl StandardWorkloadMix {
    pub fn new(options: CrocodileOptions) -> Self {
        let private_url = format!("{}/my/crocodiles/", options.base_url);
        Self {
            options,
            private_url,
        }
    }

    fn private(&self, request: HttpRequest, token: &str, name: &str) -> HttpRequest {
        request.bearer(token).tag("name", name)
    }

    /// Forget the token on 401 when the refresh policy asks for it.
    fn on_response(&self, res: &HttpResponse, state: &mut CrocState) {
        if res.status == 401 && self.options.token_refresh == TokenRefresh::OnUnauthorized {
            tracing::info!("token rejected, logging in again next iteration");
            state.token = None;
        }
    }

    async fn login(&self, vu: &Vu, state: &mut CrocState) -> Option<String> {
        if let Some(token) = &state.token {
            return Some(token.clone());
        }

        let row = match vu.fixture_row() {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(worker = vu.identity().id, error = %e, "no credentials for worker");
                return None;
            }
        };
        let request = HttpRequest::post(format!("{}/auth/token/login/", self.options.base_url))
            .form([
                ("username", row.get("username").unwrap_or_default()),
                ("password", row.get("password").unwrap_or_default()),
            ])
            .tag("name", "Login");

        let res = vu.request(request).await;
        if !vu.check("Logged in successfully", res.status == 200) {
            tracing::warn!("Unable to Login {} {}", res.status, res.body);
            return None;
        }
        match res.json_field("access") {
            Some(Value::String(token)) => {
                state.token = Some(token.clone());
                Some(token)
            }
            _ => {
                tracing::warn!("Unable to Login {} {}", res.status, res.body);
                None
            }
        }
    }

    async fn create(&self, vu: &Vu, state: &mut CrocState, token: &str) -> Option<String> {
        let request = HttpRequest::post(self.private_url.as_str()).form([
            ("name", format!("Name {}", random_string(10))),
            ("sex", "M".to_string()),
            ("date_of_birth", "2022-01-01".to_string()),
        ]);
        let res = vu
            .request(self.private(request, token, "Create Private Croc"))
            .await;
        self.on_response(&res, state);

        let id = match res.json_field("id") {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        if !vu.check("Croc created correctly", res.status == 201) || id.is_none() {
            tracing::warn!("Unable to create a Croc {} {}", res.status, res.body);
            return None;
        }
        id
    }

    async fn fetch(&self, vu: &Vu, state: &mut CrocState, token: &str) {
        let request = HttpRequest::get(self.private_url.as_str());
        let res = vu
            .request(self.private(request, token, "Fetch Private Crocs"))
            .await;
        self.on_response(&res, state);
        vu.check("retrieved crocs status", res.status == 200);
        vu.check("retrieved crocs list", non_empty_list(&res));
    }

    async fn update(&self, vu: &Vu, state: &mut CrocState, token: &str, id: &str) {
        let request = HttpRequest::patch(format!("{}{}/", self.private_url, id))
            .form([("name", "New name")]);
        let res = vu
            .request(self.private(request, token, "Update Private Croc"))
            .await;
        self.on_response(&res, state);

        let status_ok = vu.check("Update worked", res.status == 200);
        let name_ok = vu.check(
            "Updated name is correct",
            res.json_field("name").as_ref().and_then(Value::as_str) == Some("New name"),
        );
        if !(status_ok && name_ok) {
            tracing::warn!("Unable to update the croc {} {}", res.status, res.body);
        }
    }

    async fn delete(&self, vu: &Vu, state: &mut CrocState, token: &str, id: &str) {
        let request = HttpRequest::delete(format!("{}{}/", self.private_url, id));
        let res = vu
            .request(self.private(request, token, "Delete Private Croc"))
            .await;
        self.on_response(&res, state);

        if !vu.check("Croc was deleted correctly", res.status == 204) {
            tracing::warn!(status = res.status, "Croc was not deleted properly");
        }
    }
}

#[async_trait]
impl Workload for StandardWorkloadMix {
    type State = CrocState;

    fn checks(&self) -> &'static [&'static str] {
        &[
            "Logged in successfully",
            "Croc created correctly",
            "retrieved crocs status",
            "retrieved crocs list",
            "Update worked",
            "Updated name is correct",
            "Croc was deleted correctly",
        ]
    }

    fn uses_fixtures(&self) -> bool {
        true
    }

    async fn iteration(&self, vu: &mut Vu, state: &mut CrocState) {
        let think = self.options.think_time;

        let token = match group("00. Login", self.login(vu, state)).await {
            Some(token) => token,
            None => return,
        };

        let id = match group(
            "01. Create a new crocodile",
            self.create(vu, state, &token),
        )
        .await
        {
            Some(id) => id,
            None => return,
        };
        vu.sleep(think).await;

        group("02. Fetch private crocs", self.fetch(vu, state, &token)).await;
        vu.sleep(think).await;

        // Delete runs even when the update failed.
        group("03. Update the croc", self.update(vu, state, &token, &id)).await;
        vu.sleep(think).await;

        group("04. Delete the croc", self.delete(vu, state, &token, &id)).await;
        vu.sleep(think).await;
    }
}

/// Public listing hit at a fixed arrival rate.
pub struct SpikeWorkload {
    url: String,
}

impl SpikeWorkload {
    pub fn new(base_url: &str) -> Self {
        Self {
            url: format!("{}/public/crocodiles/", base_url),
        }
    }
}

#[async_trait]
impl Workload for SpikeWorkload {
    type State = ();

    fn checks(&self) -> &'static [&'static str] {
        &["retrieved crocs status", "retrieved crocs list"]
    }

    async fn iteration(&self, vu: &mut Vu, _state: &mut ()) {
        let request = HttpRequest::get(self.url.as_str())
            .tag("my_custom_tag", "spikeWorkload")
            .tag("name", "Fetch Public Crocs");
        let res = vu.request(request).await;
        vu.check("retrieved crocs status", res.status == 200);
        vu.check("retrieved crocs list", non_empty_list(&res));
    }
}
