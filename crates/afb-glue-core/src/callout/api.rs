//! API call-outs: `apiadd`, `apicreate`, `apiimport`, `verbadd`

use super::{api_of, Args, CallOutTable};
use crate::convert::to_data;
use crate::dispatch::{bind_registration, ApiAdapter};
use crate::error::GlueResult;
use crate::glue::Scope;
use crate::handle::{ApiBody, HandleBody, HandleKind};
use crate::value::Value;
use std::sync::Arc;

pub(super) fn register(table: &mut CallOutTable) {
    table.register("apiadd", add_api);
    table.register("apicreate", create_api);
    table.register("apiimport", import_api);
    table.register("verbadd", add_verb);
}

/// Name an API config declares under `api`, falling back to `uid`
fn api_name(args: &Args) -> GlueResult<String> {
    let config = args.dict(0)?;
    ["api", "uid"]
        .iter()
        .find_map(|key| config.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| args.syntax("api config requires an 'api' or 'uid' string"))
}

/// `apiadd(config)`: import when the config has a `uri`, create otherwise
fn add_api(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    if args.dict(0)?.contains_key("uri") {
        import_api(scope, args)
    } else {
        create_api(scope, args)
    }
}

/// `apicreate(config)`: declare a local API served by script callables
fn create_api(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let name = api_name(&args)?;
    let config = args.value(0)?.clone();
    let control = match config.get("control") {
        None | Some(Value::None) => None,
        Some(Value::Callable(f)) => Some(f.clone()),
        Some(other) => {
            return Err(args.syntax(format!(
                "'control' should be callable, got {}",
                other.type_name()
            )))
        }
    };
    let data = to_data(&config)?;

    let handle = scope
        .registry()
        .create(HandleBody::Api(ApiBody::new(name.clone(), config, control)));
    let adapter = Arc::new(ApiAdapter::new(scope.shared(), handle.clone()));
    let api = scope.native().create_api(&data, adapter)?;
    handle.as_api().bind(api);

    tracing::info!(api = %name, id = %api, "api created");
    Ok(Value::Handle(handle))
}

/// `apiimport(config)`: bind a remote API by `uri`
fn import_api(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(1, Some(1))?;
    let uri = args
        .dict(0)?
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| args.syntax("import config requires a 'uri' string"))?
        .to_string();
    let name = api_name(&args).unwrap_or_else(|_| uri.clone());
    let config = args.value(0)?.clone();
    let data = to_data(&config)?;

    let api = scope.native().import_api(&data)?;
    let handle = scope
        .registry()
        .create(HandleBody::Api(ApiBody::new(name.clone(), config, None)));
    handle.as_api().bind(api);

    tracing::info!(api = %name, %uri, "api imported");
    Ok(Value::Handle(handle))
}

/// `verbadd(api, {verb, callback, ...}, [userdata])`
fn add_verb(scope: &mut Scope, args: Args) -> GlueResult<Value> {
    args.check_arity(2, Some(3))?;
    let api_handle = args.handle_of(0, &[HandleKind::Api, HandleKind::Binder])?;
    let config = args.dict(1)?;
    if config.get("verb").and_then(Value::as_str).is_none() {
        return Err(args.syntax("verb config requires a 'verb' string"));
    }
    let callback = match config.get("callback") {
        Some(Value::Callable(f)) => f.clone(),
        _ => return Err(args.syntax("verb config requires a callable 'callback'")),
    };
    let userdata = args.optional(2).cloned();

    let api = api_of(scope, &api_handle)?;
    let data = to_data(args.value(1)?)?;
    let registration = scope.native().add_verb(api, &data)?;
    bind_registration(&registration, callback, userdata);

    tracing::debug!(%api, verb = registration.name(), "verb added");
    Ok(Value::None)
}
