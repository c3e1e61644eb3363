//! Sessions and in-flight requests

use afb_glue_sdk::{ApiId, Completion, Data, Registration, Reply, RequestId};
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Client session, one per caller API
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) uuid: String,
    /// Caller API
    pub(crate) caller: ApiId,
    pub(crate) caller_name: String,
    loa: AtomicU32,
}

impl Session {
    pub(crate) fn new(caller: ApiId, caller_name: impl Into<String>) -> Self {
        let raw: u128 = rand::thread_rng().gen();
        Self {
            uuid: format!("{:032x}", raw),
            caller,
            caller_name: caller_name.into(),
            loa: AtomicU32::new(0),
        }
    }

    pub(crate) fn loa(&self) -> u32 {
        self.loa.load(Ordering::Acquire)
    }

    pub(crate) fn set_loa(&self, loa: u32) {
        self.loa.store(loa, Ordering::Release);
    }

    /// Client description served by `client_info`
    pub(crate) fn describe(&self) -> Data {
        Data::object([
            ("uuid", Data::from(self.uuid.as_str())),
            ("loa", Data::from(self.loa() as i64)),
            ("caller", Data::from(self.caller_name.as_str())),
            ("pid", Data::from(std::process::id() as i64)),
        ])
    }
}

/// Where a request's reply goes
pub(crate) enum ReplySink {
    /// Caller blocked in `call_sync`
    Sync(Sender<Reply>),
    /// Completion of `call_async`, run on a worker
    Async(Completion),
}

/// Request waiting for its reply
pub(crate) struct RequestEntry {
    pub(crate) api: ApiId,
    pub(crate) verb: Arc<Registration>,
    pub(crate) session: Arc<Session>,
    sink: Mutex<Option<ReplySink>>,
}

impl RequestEntry {
    pub(crate) fn new(
        api: ApiId,
        verb: Arc<Registration>,
        session: Arc<Session>,
        sink: ReplySink,
    ) -> Self {
        Self {
            api,
            verb,
            session,
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Take the reply sink; `None` once replied
    pub(crate) fn take_sink(&self) -> Option<ReplySink> {
        self.sink.lock().take()
    }
}

impl std::fmt::Debug for RequestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEntry")
            .field("api", &self.api)
            .field("verb", &self.verb.name())
            .field("session", &self.session.uuid)
            .finish()
    }
}

/// Identifier of a request, for logs
pub(crate) fn request_label(id: RequestId, entry: &RequestEntry) -> String {
    format!("{}:{}", id.as_u64(), entry.verb.name())
}
