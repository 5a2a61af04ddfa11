//! In-process fake campspot server and platform doubles.
//!
//! The server speaks the real envelope protocol: it unwraps `x-client-key`
//! with its RSA private key, decrypts the body, checks the bearer token and
//! answers encrypted under the caller's session key.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use camp_client::{
    Collaborators, HttpRequest, HttpResponse, Notice, Notifier, Pipeline, PlatformLogin,
    Transport,
};
use camp_core::config::CampConfig;
use camp_core::{CampError, CampResult, ManualClock};
use camp_crypto::{compress, encrypt, encrypt_json, SessionKey};
use camp_store::{KeyValueStore, MemoryStore};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use secrecy::SecretString;
use serde_json::{json, Value};

pub const BASE_URL: &str = "https://camp.test";
pub const EXCHANGE_PATH: &str = "/api/auth/getExchangeKey";
pub const LOGIN_PATH: &str = "/api/auth/wxLogin";
pub const REFRESH_PATH: &str = "/api/auth/refreshToken";
pub const APP_KEY: [u8; 32] = *b"campspot-app-key-0123456789abcd!";
/// 2026-01-01T00:00:00Z
pub const START_MS: u64 = 1_767_225_600_000;

fn server_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

pub fn server_public_pem() -> String {
    server_private_key()
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap()
}

pub fn config() -> CampConfig {
    let mut config = CampConfig::default();
    config.api.base_url = BASE_URL.into();
    config.keys.app_key = STANDARD.encode(APP_KEY);
    config
}

// ── Fake server ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ServerState {
    /// Completed requests, e.g. "exchange", "login", "GET /api/spots"
    log: Vec<String>,
    issued: u32,
    access: Option<String>,
    refresh: Option<String>,
    expires_in: u64,
    key_ttl: Option<u64>,
    exchange_code: i64,
    login_code: i64,
    refresh_code: i64,
    /// Next codes to answer per API path, consumed in order
    script: HashMap<String, VecDeque<i64>>,
    /// Code answered on every request to a path
    always: HashMap<String, i64>,
    delays: HashMap<String, Duration>,
    gzip: bool,
    garble_payload: bool,
    offline: bool,
    /// Error answers carry `"msg": null`
    null_msg: bool,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            issued: 0,
            access: None,
            refresh: None,
            expires_in: 7200,
            key_ttl: None,
            exchange_code: 0,
            login_code: 0,
            refresh_code: 0,
            script: HashMap::new(),
            always: HashMap::new(),
            delays: HashMap::new(),
            gzip: false,
            garble_payload: false,
            offline: false,
            null_msg: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn hits(&self, entry: &str) -> usize {
        self.state().log.iter().filter(|e| *e == entry).count()
    }

    pub fn current_access(&self) -> Option<String> {
        self.state().access.clone()
    }

    pub fn set_expires_in(&self, secs: u64) {
        self.state().expires_in = secs;
    }

    pub fn set_key_ttl(&self, secs: u64) {
        self.state().key_ttl = Some(secs);
    }

    pub fn set_exchange_code(&self, code: i64) {
        self.state().exchange_code = code;
    }

    pub fn set_login_code(&self, code: i64) {
        self.state().login_code = code;
    }

    pub fn set_refresh_code(&self, code: i64) {
        self.state().refresh_code = code;
    }

    pub fn script(&self, path: &str, codes: &[i64]) {
        self.state()
            .script
            .entry(path.to_string())
            .or_default()
            .extend(codes.iter().copied());
    }

    pub fn always(&self, path: &str, code: i64) {
        self.state().always.insert(path.to_string(), code);
    }

    pub fn delay(&self, path: &str, by: Duration) {
        self.state().delays.insert(path.to_string(), by);
    }

    pub fn set_gzip(&self, on: bool) {
        self.state().gzip = on;
    }

    pub fn set_garble_payload(&self, on: bool) {
        self.state().garble_payload = on;
    }

    pub fn set_offline(&self, on: bool) {
        self.state().offline = on;
    }

    pub fn set_null_msg(&self, on: bool) {
        self.state().null_msg = on;
    }

    /// Server-side revocation of the current access token
    pub fn revoke_access(&self) {
        self.state().access = None;
    }

    fn grant(state: &mut ServerState) -> Value {
        state.issued += 1;
        let access = format!("access-{}", state.issued);
        let refresh = format!("refresh-{}", state.issued);
        state.access = Some(access.clone());
        state.refresh = Some(refresh.clone());
        json!({
            "code": 0,
            "data": {
                "accessToken": access,
                "expiresIn": state.expires_in,
                "refreshToken": refresh,
            },
            "msg": "ok",
        })
    }

    fn respond(&self, path: &str, request: &HttpRequest) -> CampResult<Value> {
        let mut state = self.state();
        if state.offline {
            return Err(CampError::Transport("connection refused".into()));
        }
        let query = request.body.clone().unwrap_or(Value::Null);

        match path {
            EXCHANGE_PATH => {
                state.log.push("exchange".into());
                assert!(query["id"].is_string(), "exchange must carry a random id");
                if state.exchange_code != 0 {
                    return Ok(json!({"code": state.exchange_code, "msg": "exchange unavailable"}));
                }
                let mut payload = json!({ "publicKey": server_public_pem() });
                if let Some(ttl) = state.key_ttl {
                    payload["expireTime"] = json!(ttl);
                }
                let sealed = encrypt_json(&payload, &APP_KEY).unwrap();
                Ok(json!({"code": 0, "data": sealed.ciphertext, "msg": "ok"}))
            }
            LOGIN_PATH => {
                state.log.push("login".into());
                assert!(query["code"].is_string(), "login must carry the platform code");
                if state.login_code != 0 {
                    return Ok(json!({"code": state.login_code, "msg": "login rejected"}));
                }
                Ok(Self::grant(&mut state))
            }
            REFRESH_PATH => {
                state.log.push("refresh".into());
                let presented = query["refreshToken"].as_str().map(str::to_string);
                if state.refresh_code != 0 || presented.is_none() || presented != state.refresh {
                    let code = if state.refresh_code != 0 { state.refresh_code } else { 1001 };
                    return Ok(json!({"code": code, "msg": "invalid refresh token"}));
                }
                Ok(Self::grant(&mut state))
            }
            _ => self.api(&mut state, path, request),
        }
    }

    fn api(&self, state: &mut ServerState, path: &str, request: &HttpRequest) -> CampResult<Value> {
        state.log.push(format!("{} {path}", request.method));

        let wrapped = request
            .headers
            .get("x-client-key")
            .expect("encrypted call without x-client-key");
        let key_text = server_private_key()
            .decrypt(Pkcs1v15Encrypt, &STANDARD.decode(wrapped).unwrap())
            .expect("x-client-key not wrapped under the server key");
        let session_key = SessionKey::from_base64(&String::from_utf8(key_text).unwrap()).unwrap();

        let body = request.body.as_ref().expect("encrypted call without body");
        let ciphertext = body["data"].as_str().expect("body.data must be ciphertext");
        let echo = camp_crypto::decrypt(ciphertext, session_key.as_bytes(), None, false).unwrap();

        assert_eq!(request.headers.get("x-supports-gzip"), Some("true"));
        let bearer = request
            .headers
            .get("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string();

        let null_msg = state.null_msg;
        let failure = |code: i64, msg: String| {
            let msg = if null_msg { Value::Null } else { json!(msg) };
            json!({"code": code, "data": null, "msg": msg})
        };
        if let Some(code) = state.always.get(path) {
            return Ok(failure(*code, format!("forced {code}")));
        }
        if let Some(code) = state.script.get_mut(path).and_then(VecDeque::pop_front) {
            if code != 0 {
                return Ok(failure(code, format!("scripted {code}")));
            }
        }
        if state.access.as_deref() != Some(bearer.as_str()) {
            return Ok(failure(401, "access token expired".into()));
        }

        let data = json!({ "path": path, "echo": echo, "token": bearer });
        if state.garble_payload {
            return Ok(json!({"code": 0, "data": "bm90IHRoZSByaWdodCBrZXk=", "msg": "ok"}));
        }
        if state.gzip {
            let packed = compress::gzip_base64(&data.to_string()).unwrap();
            let sealed = encrypt(&packed, session_key.as_bytes(), None).unwrap();
            return Ok(json!({"code": 0, "data": sealed.ciphertext, "msg": "ok", "compressed": true}));
        }
        let sealed = encrypt_json(&data, session_key.as_bytes()).unwrap();
        Ok(json!({"code": 0, "data": sealed.ciphertext, "msg": "ok"}))
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: HttpRequest) -> CampResult<HttpResponse> {
        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .to_string();
        assert_eq!(request.headers.get("platform"), Some("mp-weixin"));

        let delay = self.state().delays.get(&path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let body = self.respond(&path, &request)?;
        Ok(HttpResponse { status: 200, body })
    }
}

// ── Platform doubles ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeLogin {
    calls: AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeLogin {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    /// Make the platform handshake take `by` before answering
    pub fn set_delay(&self, by: Duration) {
        *self.delay.lock().unwrap() = Some(by);
    }
}

#[async_trait]
impl PlatformLogin for FakeLogin {
    async fn login(&self) -> CampResult<SecretString> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CampError::Auth("platform login cancelled".into()));
        }
        Ok(SecretString::from(format!("code-{n}")))
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Store whose reads always fail; writes are accepted and kept
#[derive(Debug, Default)]
pub struct UnreadableStore {
    inner: MemoryStore,
}

#[async_trait]
impl KeyValueStore for UnreadableStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        anyhow::bail!("storage read failed for '{key}'")
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.inner.remove(key).await
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub login: Arc<FakeLogin>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<ManualClock>,
    pub notices: Arc<RecordingNotifier>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self::build(config(), Arc::new(FakeServer::default()), store)
    }

    /// A second pipeline sharing this one's server and store, as after an
    /// app restart.
    pub fn restart(&self) -> Self {
        Self::build(config(), Arc::clone(&self.server), Arc::clone(&self.store))
    }

    fn build(config: CampConfig, server: Arc<FakeServer>, store: Arc<dyn KeyValueStore>) -> Self {
        let login = Arc::new(FakeLogin::default());
        let clock = Arc::new(ManualClock::new(START_MS));
        let notices = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new(
            &config,
            Collaborators {
                transport: server.clone(),
                login: login.clone(),
                store: store.clone(),
                clock: clock.clone(),
                notifier: notices.clone(),
            },
        )
        .unwrap();
        Self {
            server,
            login,
            store,
            clock,
            notices,
            pipeline,
        }
    }
}
