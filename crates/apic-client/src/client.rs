//! APIC REST client
//!
//! Session-cookie authentication against `/api/aaaLogin.json`, failing over
//! across the configured controller hosts, plus the replace-by-key writer.
//! The client remembers what it last wrote under each label key and turns a
//! write into the diff between the two slices (see [`crate::diff`]).
//!
//! Every top-level object written under a key carries a `tagAnnotation`
//! child naming that key. The first write or clear of a key the client has
//! no record of (after a restart, or after a failed write) rebuilds the
//! previous slice from the tagged objects on the fabric, so stale objects
//! are still removed.

use crate::apic_trait::ApicClientTrait;
use crate::diff::diff_slices;
use crate::error::ApicError;
use crate::models::{ApicObject, ApicResponse, ApicSlice};
use reqwest::{Client, Method, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Class of the ownership tag attached to written objects
pub const OWNER_TAG_CLASS: &str = "tagAnnotation";
/// Annotation key the ownership tag is stored under
pub const OWNER_TAG_KEY: &str = "aci-bridge-owner";

// None until the key's previous slice is known
type OwnedSlot = Arc<Mutex<Option<ApicSlice>>>;

#[derive(Debug, Default)]
struct Session {
    host_idx: usize,
    token: Option<String>,
}

/// APIC API client
pub struct ApicClient {
    client: Client,
    hosts: Vec<String>,
    username: String,
    password: String,
    session: Mutex<Session>,
    // label key -> slice last written under it, locked per key
    owned: std::sync::Mutex<HashMap<String, OwnedSlot>>,
}

impl ApicClient {
    /// Create a new APIC client
    ///
    /// # Arguments
    /// * `hosts` - controller addresses, tried in order (e.g. "apic1.example.com" or "https://10.0.0.1")
    /// * `username` / `password` - local APIC user
    /// * `insecure` - skip certificate verification (lab fabrics with self-signed certificates)
    pub fn new(hosts: Vec<String>, username: String, password: String, insecure: bool) -> Result<Self, ApicError> {
        if hosts.is_empty() {
            return Err(ApicError::Authentication("no APIC hosts configured".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(ApicError::Http)?;

        let hosts = hosts
            .into_iter()
            .map(|h| {
                let h = h.trim_end_matches('/');
                if h.starts_with("http") {
                    h.to_string()
                } else {
                    format!("https://{}", h)
                }
            })
            .collect();

        Ok(Self {
            client,
            hosts,
            username,
            password,
            session: Mutex::new(Session::default()),
            owned: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Log in, trying every host once starting from the current one
    pub async fn login(&self) -> Result<(), ApicError> {
        let mut session = self.session.lock().await;
        self.login_locked(&mut session).await
    }

    async fn login_locked(&self, session: &mut Session) -> Result<(), ApicError> {
        let mut last_err = String::new();
        for offset in 0..self.hosts.len() {
            let idx = (session.host_idx + offset) % self.hosts.len();
            let host = &self.hosts[idx];
            match self.login_host(host).await {
                Ok(token) => {
                    info!("Logged in to APIC {}", host);
                    session.host_idx = idx;
                    session.token = Some(token);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Login to APIC {} failed: {}", host, e);
                    last_err = e.to_string();
                }
            }
        }
        session.token = None;
        Err(ApicError::Authentication(last_err))
    }

    async fn login_host(&self, host: &str) -> Result<String, ApicError> {
        let url = format!("{}/api/aaaLogin.json", host);
        let body = serde_json::json!({
            "aaaUser": {"attributes": {"name": self.username, "pwd": self.password}}
        });
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApicError::Authentication(format!("{} - {}", status, text)));
        }
        let parsed: ApicResponse = serde_json::from_str(&text)?;
        parsed
            .imdata
            .iter()
            .find(|o| o.class == "aaaLogin")
            .and_then(|o| o.attr("token"))
            .map(str::to_string)
            .ok_or_else(|| ApicError::Authentication("login response carried no token".to_string()))
    }

    async fn current(&self) -> Result<(String, String), ApicError> {
        let mut session = self.session.lock().await;
        if session.token.is_none() {
            self.login_locked(&mut session).await?;
        }
        let token = session.token.clone().unwrap_or_default();
        Ok((self.hosts[session.host_idx].clone(), token))
    }

    async fn invalidate(&self, fail_over: bool) {
        let mut session = self.session.lock().await;
        session.token = None;
        if fail_over {
            session.host_idx = (session.host_idx + 1) % self.hosts.len();
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApicResponse, ApicError> {
        let mut relogged = false;
        let mut failovers = 0;
        loop {
            let (host, token) = self.current().await?;
            let url = format!("{}{}", host, path);
            debug!("{} {}", method, url);

            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("Cookie", format!("APIC-cookie={}", token))
                .header("Accept", "application/json");
            if let Some(body) = body {
                req = req.json(body);
            }

            let response = match req.send().await {
                Ok(response) => response,
                Err(e) if failovers + 1 < self.hosts.len() => {
                    warn!("APIC {} unreachable, failing over: {}", host, e);
                    failovers += 1;
                    self.invalidate(true).await;
                    continue;
                }
                Err(e) => return Err(ApicError::Http(e)),
            };

            let status = response.status();
            if (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN) && !relogged {
                debug!("APIC session expired, logging in again");
                relogged = true;
                self.invalidate(false).await;
                continue;
            }
            let text = response.text().await?;
            if status == StatusCode::NOT_FOUND {
                return Err(ApicError::NotFound(path.to_string()));
            }
            if !status.is_success() {
                return Err(ApicError::Api(format!("{} {} failed: {} - {}", method, path, status, text)));
            }
            if text.trim().is_empty() {
                return Ok(ApicResponse::default());
            }
            let parsed: ApicResponse = serde_json::from_str(&text)?;
            if let Some(err) = parsed.error_text() {
                return Err(ApicError::Api(format!("{} {}: {}", method, path, err)));
            }
            return Ok(parsed);
        }
    }

    async fn post_object(&self, obj: &ApicObject) -> Result<(), ApicError> {
        if obj.dn().is_empty() {
            return Err(ApicError::InvalidObject(format!("{} object without dn", obj.class)));
        }
        let body = serde_json::to_value(obj)?;
        self.request(Method::POST, &format!("/api/mo/{}.json", obj.dn()), Some(&body))
            .await?;
        Ok(())
    }

    async fn delete_dn(&self, dn: &str) -> Result<(), ApicError> {
        match self.request(Method::DELETE, &format!("/api/mo/{}.json", dn), None).await {
            Ok(_) | Err(ApicError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Per-key slot; the map lock is only held for the lookup
    fn slot(&self, key: &str) -> OwnedSlot {
        let mut owned = self.owned.lock().unwrap_or_else(PoisonError::into_inner);
        owned.entry(key.to_string()).or_default().clone()
    }

    /// Objects on the fabric tagged as owned by `key`. Only their DNs are
    /// known, so each comes back as a bare placeholder.
    async fn owned_on_fabric(&self, key: &str) -> Result<ApicSlice, ApicError> {
        let filter = format!(
            "and(eq({cls}.key,\"{}\"),eq({cls}.value,\"{}\"))",
            OWNER_TAG_KEY,
            key,
            cls = OWNER_TAG_CLASS
        );
        let path = format!(
            "/api/class/{}.json?query-target-filter={}",
            OWNER_TAG_CLASS,
            urlencoding::encode(&filter)
        );
        let tags = self.request(Method::GET, &path, None).await?.imdata;
        let previous = owned_dns(&tags, key)
            .into_iter()
            .map(|dn| ApicObject::new("", dn))
            .collect::<ApicSlice>();
        debug!("Found {} tagged object(s) for {} on the fabric", previous.len(), key);
        Ok(previous)
    }
}

/// DN of the ownership tag under `dn`
pub fn owner_tag_dn(dn: &str) -> String {
    format!("{}/annotationKey-[{}]", dn, OWNER_TAG_KEY)
}

/// Attach the ownership tag for `key` to a top-level object
pub fn tag_owner(mut obj: ApicObject, key: &str) -> ApicObject {
    if obj.dn().is_empty() {
        return obj;
    }
    let tag_dn = owner_tag_dn(obj.dn());
    obj.children.retain(|c| c.dn() != tag_dn);
    obj.add_child(
        ApicObject::new(OWNER_TAG_CLASS, tag_dn)
            .with_attr("key", OWNER_TAG_KEY)
            .with_attr("value", key),
    );
    obj
}

/// Parent DNs of the ownership tags in `tags` that name `key`
fn owned_dns(tags: &[ApicObject], key: &str) -> Vec<String> {
    let suffix = format!("/annotationKey-[{}]", OWNER_TAG_KEY);
    let mut dns: Vec<String> = tags
        .iter()
        .filter(|t| t.class == OWNER_TAG_CLASS && t.attr_str("key") == OWNER_TAG_KEY && t.attr_str("value") == key)
        .filter_map(|t| t.dn().strip_suffix(suffix.as_str()))
        .map(str::to_string)
        .collect();
    dns.sort();
    dns.dedup();
    dns
}

#[async_trait::async_trait]
impl ApicClientTrait for ApicClient {
    async fn write_apic_objects(&self, key: &str, objects: ApicSlice) -> Result<(), ApicError> {
        let slot = self.slot(key);
        // Held for the whole write so two writers of one key never diff
        // against the same base. Left empty on error so the next attempt
        // starts again from the fabric.
        let mut owned = slot.lock().await;
        let previous = match owned.take() {
            Some(previous) => previous,
            None => self.owned_on_fabric(key).await?,
        };
        let objects: ApicSlice = objects.into_iter().map(|o| tag_owner(o, key)).collect();
        let diff = diff_slices(&previous, &objects);
        if diff.is_empty() {
            debug!("No fabric changes for {}", key);
            *owned = Some(objects);
            return Ok(());
        }

        debug!(
            "Writing {}: {} update(s), {} delete(s)",
            key,
            diff.updates.len(),
            diff.deletes.len()
        );
        for dn in &diff.deletes {
            self.delete_dn(dn).await?;
        }
        for obj in &diff.updates {
            self.post_object(obj).await?;
        }
        *owned = Some(objects);
        Ok(())
    }

    async fn clear_apic_objects(&self, key: &str) -> Result<(), ApicError> {
        let slot = self.slot(key);
        let mut owned = slot.lock().await;
        let previous = match owned.take() {
            Some(previous) => previous,
            None => self.owned_on_fabric(key).await?,
        };
        if !previous.is_empty() {
            debug!("Clearing {} object(s) under {}", previous.len(), key);
        }
        for obj in &previous {
            self.delete_dn(obj.dn()).await?;
        }
        *owned = Some(Vec::new());
        Ok(())
    }

    async fn query_class(&self, class: &str) -> Result<Vec<ApicObject>, ApicError> {
        let path = format!("/api/class/{}.json?rsp-subtree=full", urlencoding::encode(class));
        Ok(self.request(Method::GET, &path, None).await?.imdata)
    }

    async fn query_dn_subtree(&self, dn: &str, classes: &[String]) -> Result<Vec<ApicObject>, ApicError> {
        let mut path = format!("/api/mo/{}.json?query-target=subtree&rsp-subtree=full", dn);
        if !classes.is_empty() {
            path.push_str("&target-subtree-class=");
            path.push_str(&urlencoding::encode(&classes.join(",")));
        }
        match self.request(Method::GET, &path, None).await {
            Ok(resp) => Ok(resp.imdata),
            Err(ApicError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
