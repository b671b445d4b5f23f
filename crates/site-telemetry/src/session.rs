use std::sync::OnceLock;

use chrono::Utc;
use rand::Rng;

const RANDOM_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static PROCESS_SESSION: SessionCorrelator = SessionCorrelator::new();

/// Holds the session id shared by every event recorded in one process.
///
/// The id is generated lazily on first access and cached for the lifetime of
/// the correlator. It is never persisted or renewed.
#[derive(Debug, Default)]
pub struct SessionCorrelator {
    id: OnceLock<String>,
}

impl SessionCorrelator {
    pub const fn new() -> Self {
        Self {
            id: OnceLock::new(),
        }
    }

    /// The correlator shared by the whole process.
    pub fn process() -> &'static SessionCorrelator {
        &PROCESS_SESSION
    }

    pub fn session_id(&self) -> &str {
        self.id.get_or_init(generate_session_id)
    }
}

/// `session_<unix millis>_<9 base36 chars>`
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RANDOM_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("session_{}_{}", Utc::now().timestamp_millis(), suffix)
}
