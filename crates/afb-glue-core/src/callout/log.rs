//! Logging call-outs: `error`, `warning`, `notice`, `info`, `debug`
//!
//! Each takes `(handle, format, ...args)` and tags the line with the API
//! and, for requests, the verb the handle belongs to.

use super::{api_of, Args, CallOutTable};
use crate::error::GlueResult;
use crate::glue::Scope;
use crate::handle::HandleBody;
use crate::logging::{format_message, script_event, ScriptLevel};
use crate::value::Value;

pub(super) fn register(table: &mut CallOutTable) {
    table.register("error", |s, a| log(s, a, ScriptLevel::Error));
    table.register("warning", |s, a| log(s, a, ScriptLevel::Warning));
    table.register("notice", |s, a| log(s, a, ScriptLevel::Notice));
    table.register("info", |s, a| log(s, a, ScriptLevel::Info));
    table.register("debug", |s, a| log(s, a, ScriptLevel::Debug));
}

fn log(scope: &mut Scope, args: Args, level: ScriptLevel) -> GlueResult<Value> {
    args.check_arity(2, None)?;
    let format = args.string(1)?;

    let (api, verb) = match args.optional(0) {
        None => (None, None),
        Some(_) => {
            let handle = args.handle(0)?;
            let verb = match handle.body() {
                HandleBody::Request(req) => Some(req.verb.name().to_string()),
                _ => None,
            };
            let api = match handle.body() {
                HandleBody::Api(api) => Some(api.name.clone()),
                _ => api_of(scope, &handle)
                    .ok()
                    .and_then(|id| scope.native().api_name(id)),
            };
            (api, verb)
        }
    };

    let message = format_message(format, args.rest(2));
    script_event(level, api.as_deref(), verb.as_deref(), &message);
    Ok(Value::None)
}
