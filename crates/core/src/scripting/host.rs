//! Loads Script records and runs them in fresh environments.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use super::capabilities::{Capability, CapabilitySet};
use super::environment::{ScriptContext, ScriptEnvironment};
use super::fetch::Fetcher;
use super::types::{SandboxConfig, ScriptingError};
use super::ui::UiFacade;
use crate::actions::Namespaces;
use crate::auth::{Authenticator, Caller, Identity, LevelScale};
use crate::config::ScriptSettings;
use crate::entities::EntityKind;
use crate::store::{Record, RecordId, RecordStore};

/// Name used for interactive sessions.
pub const REPL_NAME: &str = "<repl>";

pub struct ScriptHost {
    store: Arc<dyn RecordStore>,
    namespaces: Namespaces,
    authenticator: Arc<Authenticator>,
    fetcher: Arc<Fetcher>,
    sandbox: SandboxConfig,
    settings: HashMap<String, ScriptSettings>,
    scale: LevelScale,
}

impl ScriptHost {
    pub fn new(
        store: Arc<dyn RecordStore>,
        namespaces: Namespaces,
        authenticator: Arc<Authenticator>,
        fetcher: Arc<Fetcher>,
        sandbox: SandboxConfig,
        settings: HashMap<String, ScriptSettings>,
    ) -> Self {
        let scale = authenticator.policy().scale;
        Self { store, namespaces, authenticator, fetcher, sandbox, settings, scale }
    }

    /// The Script record, read by the host itself rather than through the
    /// Script namespace.
    pub fn load(&self, name: &str) -> Result<Record, ScriptingError> {
        self.store
            .fetch(EntityKind::Script, &RecordId::from(name))?
            .ok_or_else(|| ScriptingError::ScriptNotFound(name.to_string()))
    }

    pub fn capabilities(&self, record: &Record) -> Result<CapabilitySet, ScriptingError> {
        let name = record.id.to_string();
        let caps = CapabilitySet::resolve(record, self.settings.get(&name))?;
        if let Some(level) = caps.setlevel().filter(|l| *l > self.scale.max) {
            return Err(ScriptingError::Config {
                script: name,
                reason: format!("setlevel {level} exceeds maximum {}", self.scale.max),
            });
        }
        Ok(caps)
    }

    /// Run script `name` on behalf of `invoker`, then call `function` if given.
    pub fn run(
        &self,
        name: &str,
        function: Option<&str>,
        invoker: Identity,
        ui: Option<Rc<dyn UiFacade>>,
    ) -> Result<(), ScriptingError> {
        let record = self.load(name)?;
        let code = record.fields.get("code").and_then(Value::as_str).unwrap_or_default().to_string();
        let caps = self.capabilities(&record)?;

        let identity = Identity::script(name, invoker.clone(), caps.setlevel());
        let caller = Caller::new(identity).with_auth_granted(caps.has(Capability::AuthGranted));
        info!(script = name, caller = %caller.identity(), "running script");

        let env = self.environment(name, caps, caller, invoker, ui)?;
        env.exec(&code)?;
        if let Some(function) = function {
            env.call(function)?;
        }
        Ok(())
    }

    /// An environment for typing Lua directly as `identity`. No capabilities.
    pub fn interactive(
        &self,
        identity: Identity,
        ui: Option<Rc<dyn UiFacade>>,
    ) -> Result<ScriptEnvironment, ScriptingError> {
        let caller = Caller::new(identity.clone());
        self.environment(REPL_NAME, CapabilitySet::default(), caller, identity, ui)
    }

    fn environment(
        &self,
        name: &str,
        caps: CapabilitySet,
        caller: Caller,
        invoker: Identity,
        ui: Option<Rc<dyn UiFacade>>,
    ) -> Result<ScriptEnvironment, ScriptingError> {
        let ctx = ScriptContext {
            name: name.to_string(),
            caps,
            caller: Arc::new(caller),
            invoker,
            namespaces: self.namespaces.clone(),
            store: Arc::clone(&self.store),
            authenticator: Arc::clone(&self.authenticator),
            fetcher: Arc::clone(&self.fetcher),
            ui,
        };
        let empty = Map::new();
        let config = self.settings.get(name).map_or(&empty, |s| &s.config);
        ScriptEnvironment::new(&self.sandbox, ctx, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionError;
    use crate::auth::{AuthPolicy, hash_password};
    use crate::entities::EntityRegistry;
    use crate::scripting::fetch::tests::MockTransport;
    use crate::scripting::ui::tests::RecordingUi;
    use crate::store::Database;
    use regex::Regex;
    use serde_json::json;

    struct Fixture {
        store: Arc<dyn RecordStore>,
        host: ScriptHost,
        transport: Arc<MockTransport>,
    }

    fn fixture_with(settings: HashMap<String, ScriptSettings>) -> Fixture {
        let store: Arc<dyn RecordStore> = Arc::new(Database::open_in_memory().unwrap());
        let policy = AuthPolicy::default();
        let namespaces = Namespaces::new(&EntityRegistry::builtin(), Arc::clone(&store), policy);
        let authenticator = Arc::new(Authenticator::new(Arc::clone(&store), policy));
        let transport = MockTransport::new("application/json", r#"{"title": "Dune"}"#);
        let pattern = Regex::new(r"^https://books\.example/").unwrap();
        let fetcher = Arc::new(Fetcher::new(Some(pattern), transport.clone()));

        let alice = json!({"name": "alice", "level": 4});
        store
            .insert(EntityKind::Member, Some(RecordId::from("alice")), alice.as_object().unwrap())
            .unwrap();
        store.set_credential("alice", &hash_password("secret").unwrap()).unwrap();

        let host = ScriptHost::new(
            Arc::clone(&store),
            namespaces,
            authenticator,
            fetcher,
            SandboxConfig::default(),
            settings,
        );
        Fixture { store, host, transport }
    }

    fn fixture() -> Fixture {
        fixture_with(HashMap::new())
    }

    impl Fixture {
        fn add_script(&self, name: &str, code: &str, permissions: &[&str], setlevel: Option<u8>) {
            let mut fields = json!({"name": name, "code": code, "permissions": permissions});
            if let Some(level) = setlevel {
                fields["setlevel"] = json!(level);
            }
            self.store
                .insert(EntityKind::Script, Some(RecordId::from(name)), fields.as_object().unwrap())
                .unwrap();
        }

        fn run(&self, name: &str, invoker: Identity) -> Result<(), ScriptingError> {
            self.host.run(name, None, invoker, None)
        }
    }

    fn action_err(result: Result<(), ScriptingError>) -> ActionError {
        match result {
            Err(ScriptingError::Action(e)) => e,
            other => panic!("expected an action error, got {other:?}"),
        }
    }

    const NEW_BOOK: &str =
        r#"return buchschloss.Book.new{isbn = 1, author = "A", title = "T", year = 2000}"#;

    #[test]
    fn test_script_creates_and_reads_book() {
        let f = fixture();
        f.add_script(
            "shelve",
            r#"
            local id = buchschloss.Book.new{isbn = 1, author = "A", title = "T", year = 2000}
            local book = buchschloss.Book[id]
            assert(book.title == "T")
            assert(tostring(book) == "Book[" .. id .. "]")
            assert(buchschloss.Book:view(id) == book)
            "#,
            &[],
            None,
        );
        f.run("shelve", Identity::authenticated("alice", 2)).unwrap();

        let books = f.store.search(EntityKind::Book, &crate::store::Condition::All).unwrap();
        assert_eq!(books.len(), 1);
    }

    #[test]
    fn test_script_runs_with_invoker_level() {
        let f = fixture();
        f.add_script("shelve", NEW_BOOK, &[], None);
        let err = action_err(f.run("shelve", Identity::guest()));
        assert!(matches!(err, ActionError::PermissionDenied { .. }));
    }

    #[test]
    fn test_references_resolve_lazily() {
        let f = fixture();
        f.add_script(
            "refs",
            r#"
            buchschloss.Library.new{name = "main"}
            local id = buchschloss.Book.new{isbn = 1, author = "A", title = "T", year = 2000,
                                            library = "main"}
            assert(buchschloss.Book[id].library.name == "main")
            assert(buchschloss.Book[id].library.pay_required == false)
            "#,
            &[],
            None,
        );
        f.run("refs", Identity::authenticated("alice", 4)).unwrap();
    }

    #[test]
    fn test_missing_record_raised_on_first_read() {
        let f = fixture();
        f.add_script("ghost", "local b = buchschloss.Book[99]\nreturn b.title", &[], None);
        let err = action_err(f.run("ghost", Identity::authenticated("alice", 4)));
        assert!(matches!(err, ActionError::NotFound { .. }));
    }

    #[test]
    fn test_setlevel_does_not_affect_check_level() {
        let f = fixture();
        f.add_script(
            "forced",
            &format!(
                r#"
                assert(buchschloss.login_context.level == 4)
                assert(buchschloss.login_context.type == "SCRIPT")
                if buchschloss.check_level(3) then {NEW_BOOK} end
                "#
            ),
            &[],
            Some(4),
        );
        let ui = Rc::new(RecordingUi::default());
        f.host
            .run("forced", None, Identity::guest(), Some(ui.clone() as Rc<dyn UiFacade>))
            .unwrap();

        assert_eq!(*ui.alerts.borrow(), vec!["must_be_level 3".to_string()]);
        assert_eq!(f.store.search(EntityKind::Book, &crate::store::Condition::All).unwrap().len(), 1);
    }

    #[test]
    fn test_storage_requires_capability() {
        let f = fixture();
        f.add_script("nosy", "buchschloss.get_storage()", &[], None);
        let err = action_err(f.run("nosy", Identity::unprivileged_internal()));
        assert!(matches!(err, ActionError::CapabilityAbsent(_)));
    }

    #[test]
    fn test_set_storage_requires_capability() {
        let f = fixture();
        f.add_script("writer", "buchschloss.set_storage{x = 1}", &[], None);
        let err = action_err(f.run("writer", Identity::unprivileged_internal()));
        assert!(matches!(err, ActionError::CapabilityAbsent(_)));
        assert_eq!(f.store.script_storage("writer").unwrap(), None);
    }

    #[test]
    fn test_storage_cycles_replace_whole_document() {
        let f = fixture();
        f.add_script(
            "rotate",
            r#"
            local s = buchschloss.get_storage()
            local n = (s.n or 0) + 1
            buchschloss.set_storage{n = n, ["run" .. n] = true}
            "#,
            &["STORE"],
            None,
        );
        f.run("rotate", Identity::unprivileged_internal()).unwrap();
        assert_eq!(f.store.script_storage("rotate").unwrap(), Some(json!({"n": 1, "run1": true})));
        f.run("rotate", Identity::unprivileged_internal()).unwrap();
        assert_eq!(f.store.script_storage("rotate").unwrap(), Some(json!({"n": 2, "run2": true})));
    }

    #[test]
    fn test_storage_persists_between_runs() {
        let f = fixture();
        f.add_script(
            "counter",
            r#"
            local s = buchschloss.get_storage()
            s.count = (s.count or 0) + 1
            buchschloss.set_storage(s)
            "#,
            &["STORE"],
            None,
        );
        f.run("counter", Identity::unprivileged_internal()).unwrap();
        f.run("counter", Identity::unprivileged_internal()).unwrap();
        assert_eq!(f.store.script_storage("counter").unwrap(), Some(json!({"count": 2})));
    }

    #[test]
    fn test_config_settings_take_precedence() {
        let settings = ScriptSettings {
            permissions: Some(vec!["STORE".into()]),
            config: json!({"greeting": "hi"}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        let f = fixture_with(HashMap::from([("cfg".to_string(), settings)]));
        f.add_script("cfg", "buchschloss.set_storage{said = config.greeting}", &[], None);
        f.run("cfg", Identity::unprivileged_internal()).unwrap();
        assert_eq!(f.store.script_storage("cfg").unwrap(), Some(json!({"said": "hi"})));
    }

    #[test]
    fn test_requests_need_capability() {
        let f = fixture();
        f.add_script("fetch", r#"requests.get("https://books.example/isbn/1")"#, &[], None);
        let err = action_err(f.run("fetch", Identity::unprivileged_internal()));
        assert!(matches!(err, ActionError::RequestRejected(_)));
        assert!(f.transport.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_requests_follow_allow_list() {
        let f = fixture();
        f.add_script("outside", r#"requests.get("https://evil.example/")"#, &["REQUESTS"], None);
        let err = action_err(f.run("outside", Identity::unprivileged_internal()));
        assert!(matches!(err, ActionError::RequestRejected(_)));

        f.add_script(
            "inside",
            r#"
            local data = requests.get("https://books.example/isbn/1", "json")
            buchschloss.set_storage{title = data.title}
            "#,
            &["REQUESTS", "STORE"],
            None,
        );
        f.run("inside", Identity::unprivileged_internal()).unwrap();
        assert_eq!(f.store.script_storage("inside").unwrap(), Some(json!({"title": "Dune"})));
        assert_eq!(*f.transport.requests.lock().unwrap(), vec!["https://books.example/isbn/1"]);
    }

    #[test]
    fn test_ui_bindings() {
        let f = fixture();
        f.add_script(
            "greet",
            r#"
            ui.alert("hello", "Ada")
            ui.display({shelf = 3})
            assert(ui.ask("sure") == true)
            "#,
            &[],
            None,
        );
        let ui = Rc::new(RecordingUi {
            answer: true,
            names: HashMap::from([("script::greet::hello".to_string(), "Hello {}".to_string())]),
            ..Default::default()
        });
        f.host
            .run("greet", None, Identity::guest(), Some(ui.clone() as Rc<dyn UiFacade>))
            .unwrap();
        assert_eq!(*ui.alerts.borrow(), vec!["Hello Ada".to_string()]);
        assert_eq!(*ui.displayed.borrow(), vec![json!({"shelf": 3})]);
    }

    #[test]
    fn test_no_ui_table_without_ui() {
        let f = fixture();
        f.add_script("headless", "assert(ui == nil)", &[], None);
        f.run("headless", Identity::unprivileged_internal()).unwrap();
    }

    #[test]
    fn test_sensitive_operation_needs_current_password() {
        let f = fixture();
        let alice = || Identity::authenticated("alice", 4);
        f.add_script("bare", r#"buchschloss.Member.new{name = "eve", level = 1, password = "pw"}"#, &[], None);
        f.add_script(
            "wrong",
            r#"buchschloss.Member.new{name = "eve", level = 1, password = "pw", current_password = "nope"}"#,
            &[],
            None,
        );
        f.add_script(
            "proper",
            r#"buchschloss.Member.new{name = "eve", level = 1, password = "pw", current_password = "secret"}"#,
            &[],
            None,
        );

        assert!(matches!(
            action_err(f.run("bare", alice())),
            ActionError::ReauthenticationRequired { .. }
        ));
        assert_eq!(action_err(f.run("wrong", alice())), ActionError::InvalidCredentials);
        f.run("proper", alice()).unwrap();
        assert!(f.store.credential("eve").unwrap().is_some());
    }

    #[test]
    fn test_auth_granted_skips_reauthentication() {
        let f = fixture();
        f.add_script(
            "admin",
            r#"buchschloss.Member.new{name = "eve", level = 1, password = "pw"}"#,
            &["AUTH_GRANTED"],
            None,
        );
        f.run("admin", Identity::authenticated("alice", 4)).unwrap();
    }

    #[test]
    fn test_script_cannot_change_invoker_password() {
        let f = fixture();
        let bob = json!({"name": "bob", "level": 1});
        f.store
            .insert(EntityKind::Member, Some(RecordId::from("bob")), bob.as_object().unwrap())
            .unwrap();
        f.store.set_credential("bob", &hash_password("bobpw").unwrap()).unwrap();
        f.add_script(
            "hijack",
            r#"buchschloss.Member["bob"].change_password{new_password = "pwned"}"#,
            &["AUTH_GRANTED"],
            Some(0),
        );

        let err = action_err(f.run("hijack", Identity::authenticated("bob", 1)));
        assert!(matches!(err, ActionError::PermissionDenied { .. }));
        let hash = f.store.credential("bob").unwrap().unwrap();
        assert!(crate::auth::verify_password("bobpw", &hash).unwrap());
    }

    #[test]
    fn test_login_context_nests_invoker() {
        let f = fixture();
        f.add_script(
            "whoami",
            r#"
            local ctx = buchschloss.login_context
            assert(ctx.type == "SCRIPT" and ctx.name == "whoami" and ctx.level == 2)
            assert(ctx.invoker.type == "MEMBER")
            assert(ctx.invoker.name == "alice")
            assert(ctx.invoker.level == 4)
            assert(ctx.invoker.invoker == nil)
            "#,
            &[],
            Some(2),
        );
        f.run("whoami", Identity::authenticated("alice", 4)).unwrap();
    }

    #[test]
    fn test_sandbox_has_no_os() {
        let f = fixture();
        f.add_script("escape", "os.execute('true')", &[], None);
        assert!(matches!(
            f.run("escape", Identity::unprivileged_internal()),
            Err(ScriptingError::Runtime(_))
        ));
    }

    #[test]
    fn test_missing_script_and_function() {
        let f = fixture();
        assert!(matches!(
            f.run("nope", Identity::guest()),
            Err(ScriptingError::ScriptNotFound(_))
        ));
        f.add_script("body", "x = 1", &[], None);
        assert!(matches!(
            f.host.run("body", Some("missing"), Identity::guest(), None),
            Err(ScriptingError::FunctionNotFound { .. })
        ));
    }

    #[test]
    fn test_setlevel_above_scale_rejected() {
        let settings = ScriptSettings { setlevel: Some(11), ..Default::default() };
        let f = fixture_with(HashMap::from([("high".to_string(), settings)]));
        f.add_script("high", "x = 1", &[], None);
        assert!(matches!(
            f.run("high", Identity::guest()),
            Err(ScriptingError::Config { .. })
        ));
    }

    #[test]
    fn test_interactive_runs_as_identity() {
        let f = fixture();
        let env = f.host.interactive(Identity::guest(), None).unwrap();
        assert_eq!(env.eval("return buchschloss.login_context.type").unwrap(), Some("GUEST".into()));
        assert!(env.eval("return buchschloss.get_storage()").is_err());
    }
}
