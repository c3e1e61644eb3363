//! Runtime stub shared by unit tests

use afb_glue_sdk::{
    ApiHandler, ApiId, CallOrigin, Completion, Data, EnterFn, EventId, EventListener, JobFn,
    JobId, LockId, NativeBinder, NativeData, NativeError, NativeResult, Registration, Reply,
    RequestId, StartupFn, TimerId, TimerListener, TimerSpec,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Runtime stub recording timer references
#[derive(Default)]
pub(crate) struct CountingBinder {
    pub(crate) timer_refs: Mutex<i64>,
    pub(crate) events_dropped: Mutex<usize>,
    /// Run once inside `configure`
    pub(crate) on_configure: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl NativeBinder for CountingBinder {
    fn configure(&self, _: &Data) -> NativeResult<ApiId> {
        let hook = self.on_configure.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(ApiId::from_raw(1))
    }
    fn start(&self, _: Option<StartupFn>) -> i32 {
        0
    }
    fn exit(&self, _: i32) {}
    fn load_binding(&self, _: &Data) -> NativeResult<()> {
        Ok(())
    }
    fn create_api(&self, _: &Data, _: Arc<dyn ApiHandler>) -> NativeResult<ApiId> {
        Ok(ApiId::from_raw(2))
    }
    fn import_api(&self, _: &Data) -> NativeResult<ApiId> {
        Ok(ApiId::from_raw(3))
    }
    fn add_verb(&self, _: ApiId, config: &Data) -> NativeResult<Arc<Registration>> {
        Registration::from_config(config.clone(), "verb").map(Arc::new)
    }
    fn find_api(&self, _: &str) -> Option<ApiId> {
        None
    }
    fn api_name(&self, _: ApiId) -> Option<String> {
        None
    }
    fn request_api(&self, _: RequestId) -> Option<ApiId> {
        None
    }
    fn reply(&self, _: RequestId, _: i32, _: Vec<NativeData>) -> NativeResult<()> {
        Ok(())
    }
    fn subscribe(&self, _: RequestId, _: EventId) -> NativeResult<()> {
        Ok(())
    }
    fn unsubscribe(&self, _: RequestId, _: EventId) -> NativeResult<()> {
        Ok(())
    }
    fn set_loa(&self, _: RequestId, _: u32) -> NativeResult<()> {
        Ok(())
    }
    fn client_info(&self, _: RequestId) -> NativeResult<Data> {
        Ok(Data::Null)
    }
    fn call_sync(
        &self,
        _: CallOrigin,
        _: &str,
        _: &str,
        _: Vec<NativeData>,
    ) -> NativeResult<Reply> {
        Err(NativeError::from("unsupported"))
    }
    fn call_async(
        &self,
        _: CallOrigin,
        _: &str,
        _: &str,
        _: Vec<NativeData>,
        _: Completion,
    ) -> NativeResult<()> {
        Err(NativeError::from("unsupported"))
    }
    fn new_event(&self, _: ApiId, _: &str) -> NativeResult<EventId> {
        Ok(EventId::from_raw(9))
    }
    fn push_event(&self, _: EventId, _: Vec<NativeData>) -> NativeResult<usize> {
        Ok(0)
    }
    fn unref_event(&self, _: EventId) {
        *self.events_dropped.lock() += 1;
    }
    fn add_event_handler(
        &self,
        _: ApiId,
        _: &str,
        _: &str,
        _: Arc<dyn EventListener>,
    ) -> NativeResult<()> {
        Ok(())
    }
    fn remove_event_handler(&self, _: ApiId, _: &str) -> NativeResult<()> {
        Ok(())
    }
    fn create_timer(
        &self,
        _: ApiId,
        _: &TimerSpec,
        _: Arc<dyn TimerListener>,
    ) -> NativeResult<TimerId> {
        *self.timer_refs.lock() = 1;
        Ok(TimerId::from_raw(5))
    }
    fn timer_addref(&self, _: TimerId) {
        *self.timer_refs.lock() += 1;
    }
    fn timer_unref(&self, _: TimerId) {
        *self.timer_refs.lock() -= 1;
    }
    fn post_job(&self, _: u64, _: JobFn) -> NativeResult<JobId> {
        Ok(JobId::from_raw(1))
    }
    fn abort_job(&self, _: JobId) -> NativeResult<()> {
        Ok(())
    }
    fn call_job(&self, _: u64, _: JobFn) -> NativeResult<()> {
        Ok(())
    }
    fn sched_enter(&self, _: u64, _: EnterFn) -> NativeResult<()> {
        Ok(())
    }
    fn sched_leave(&self, _: LockId) -> NativeResult<()> {
        Ok(())
    }
}
