//! API table entries

use afb_glue_sdk::{ApiHandler, ApiId, Data, EventListener, NativeError, NativeResult, Registration};
use glob::Pattern;
use parking_lot::RwLock;
use std::sync::Arc;

/// Listener behind a pattern handler
#[derive(Clone)]
pub(crate) enum HandlerTarget {
    /// Registered at run time through `add_event_handler`
    Listener(Arc<dyn EventListener>),
    /// Declared in the API config `events` array
    Declared(Arc<Registration>),
}

/// Event pattern handler of one API
#[derive(Clone)]
pub(crate) struct PatternHandler {
    pub(crate) uid: String,
    pub(crate) source: String,
    pattern: Pattern,
    pub(crate) target: HandlerTarget,
}

impl PatternHandler {
    pub(crate) fn new(uid: &str, source: &str, target: HandlerTarget) -> NativeResult<Self> {
        let pattern = Pattern::new(source).map_err(|e| {
            NativeError::InvalidConfig(format!("bad event pattern '{}': {}", source, e))
        })?;
        Ok(Self {
            uid: uid.to_string(),
            source: source.to_string(),
            pattern,
            target,
        })
    }

    pub(crate) fn matches(&self, event: &str) -> bool {
        self.pattern.matches(event)
    }
}

/// One registered API
pub(crate) struct ApiEntry {
    pub(crate) id: ApiId,
    pub(crate) name: String,
    pub(crate) class: Option<String>,
    /// `None` for the root API and imported APIs
    pub(crate) handler: Option<Arc<dyn ApiHandler>>,
    /// Remote address of an imported API
    pub(crate) uri: Option<String>,
    verbs: RwLock<Vec<Arc<Registration>>>,
    handlers: RwLock<Vec<PatternHandler>>,
}

impl ApiEntry {
    pub(crate) fn new(
        id: ApiId,
        name: impl Into<String>,
        handler: Option<Arc<dyn ApiHandler>>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            class: None,
            handler,
            uri: None,
            verbs: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Imported API reachable only through `uri`
    pub(crate) fn imported(id: ApiId, name: impl Into<String>, uri: String) -> Self {
        Self {
            uri: Some(uri),
            ..Self::new(id, name, None)
        }
    }

    /// Attach the class tag
    pub(crate) fn with_class(self, class: Option<String>) -> Self {
        Self { class, ..self }
    }

    /// Add the `verbs` and `events` declared in an API config
    pub(crate) fn declare(&self, config: &Data) -> NativeResult<()> {
        for item in config.get("verbs").and_then(Data::as_array).unwrap_or(&[]) {
            self.add_verb(Registration::from_config(item.clone(), "verb")?)?;
        }
        for item in config.get("events").and_then(Data::as_array).unwrap_or(&[]) {
            let reg = Arc::new(Registration::from_config(item.clone(), "pattern")?);
            let handler =
                PatternHandler::new(reg.uid(), reg.name(), HandlerTarget::Declared(Arc::clone(&reg)))?;
            self.add_handler(handler)?;
        }
        Ok(())
    }

    pub(crate) fn add_verb(&self, verb: Registration) -> NativeResult<Arc<Registration>> {
        let mut verbs = self.verbs.write();
        if verbs.iter().any(|v| v.name() == verb.name()) {
            return Err(NativeError::already_exists("verb", format!("{}/{}", self.name, verb.name())));
        }
        let verb = Arc::new(verb);
        verbs.push(Arc::clone(&verb));
        Ok(verb)
    }

    pub(crate) fn verb(&self, name: &str) -> Option<Arc<Registration>> {
        self.verbs.read().iter().find(|v| v.name() == name).cloned()
    }

    pub(crate) fn verbs(&self) -> Vec<Arc<Registration>> {
        self.verbs.read().clone()
    }

    pub(crate) fn add_handler(&self, handler: PatternHandler) -> NativeResult<()> {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| h.source == handler.source) {
            return Err(NativeError::already_exists("event handler", &handler.source));
        }
        handlers.push(handler);
        Ok(())
    }

    pub(crate) fn remove_handler(&self, pattern: &str) -> NativeResult<()> {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| h.source != pattern);
        if handlers.len() == before {
            return Err(NativeError::not_found("event handler", pattern));
        }
        Ok(())
    }

    /// Handlers whose pattern matches `event`
    pub(crate) fn matching(&self, event: &str) -> Vec<PatternHandler> {
        self.handlers
            .read()
            .iter()
            .filter(|h| h.matches(event))
            .cloned()
            .collect()
    }
}
