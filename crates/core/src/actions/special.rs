//! Per-entity special actions.

use serde_json::{Map, Value};
use tracing::info;

use super::errors::ActionError;
use super::namespace::ActionNamespace;
use crate::auth::{Caller, IdentityKind, authorize, hash_password};
use crate::entities::{EntityKind, Operation};
use crate::store::{CompareOp, Condition, Record, RecordId, RecordStore};

type Handler =
    fn(&ActionNamespace, &Caller, Record, Map<String, Value>) -> Result<Value, ActionError>;

const HANDLERS: &[(EntityKind, &str, Handler)] = &[
    (EntityKind::Group, "activate", group_activate),
    (EntityKind::Borrow, "restitute", borrow_restitute),
    (EntityKind::Member, "change_password", member_change_password),
];

/// Run `action` on an already authorized and fetched record.
pub(crate) fn dispatch(
    ns: &ActionNamespace,
    caller: &Caller,
    record: Record,
    action: &str,
    args: Map<String, Value>,
) -> Result<Value, ActionError> {
    let handler = HANDLERS
        .iter()
        .find(|(kind, name, _)| *kind == ns.kind() && *name == action)
        .map(|(_, _, handler)| *handler)
        .ok_or_else(|| {
            ActionError::Validation(format!("{} has no action '{action}'", ns.kind()))
        })?;
    handler(ns, caller, record, args)
}

fn allow_args(args: &Map<String, Value>, allowed: &[&str]) -> Result<(), ActionError> {
    match args.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(ActionError::Validation(format!("unexpected argument '{key}'"))),
        None => Ok(()),
    }
}

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ActionError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::Validation(format!("argument '{name}' must be a string")))
}

fn require_library(store: &dyn RecordStore, name: &str) -> Result<(), ActionError> {
    let id = RecordId::from(name);
    if store.exists(EntityKind::Library, &id)? {
        Ok(())
    } else {
        Err(ActionError::NotFound { entity: EntityKind::Library, id })
    }
}

/// Move every book of the group into library `dest`, optionally only those
/// currently in one of the `src` libraries. Returns the number of books moved.
fn group_activate(
    ns: &ActionNamespace,
    caller: &Caller,
    group: Record,
    args: Map<String, Value>,
) -> Result<Value, ActionError> {
    allow_args(&args, &["dest", "src"])?;
    let dest = string_arg(&args, "dest")?;
    let store = ns.store();
    require_library(store, dest)?;

    let src: Option<Vec<&str>> = match args.get("src") {
        None | Some(Value::Null) => None,
        Some(Value::String(lib)) => Some(vec![lib.as_str()]),
        Some(Value::Array(libs)) => Some(
            libs.iter()
                .map(|l| {
                    l.as_str().ok_or_else(|| {
                        ActionError::Validation("argument 'src' must list library names".into())
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        Some(_) => {
            return Err(ActionError::Validation(
                "argument 'src' must be a library name or a list of them".into(),
            ));
        }
    };

    let books = store.search(
        EntityKind::Book,
        &Condition::compare("groups", CompareOp::Contains, group.id.to_json()),
    )?;
    let mut moved = 0u64;
    for mut book in books {
        if let Some(src) = &src {
            let current = book.fields.get("library").and_then(Value::as_str);
            if !current.is_some_and(|lib| src.contains(&lib)) {
                continue;
            }
        }
        book.fields.insert("library".into(), Value::from(dest));
        store.update(EntityKind::Book, &book.id, &book.fields)?;
        moved += 1;
    }

    info!("{} activated {} into '{dest}' ({moved} books)", caller.identity(), group);
    Ok(Value::from(moved))
}

/// Mark the borrow as returned. Returns the shelf of the borrowed book.
fn borrow_restitute(
    ns: &ActionNamespace,
    _caller: &Caller,
    mut borrow: Record,
    args: Map<String, Value>,
) -> Result<Value, ActionError> {
    allow_args(&args, &["person"])?;
    if borrow.get("is_back") == Value::Bool(true) {
        return Err(ActionError::Validation(format!("{borrow} was already returned")));
    }
    if let Some(person) = args.get("person").filter(|p| !p.is_null()) {
        if borrow.get("person") != *person {
            return Err(ActionError::Validation(format!("{borrow} belongs to another person")));
        }
    }

    borrow.fields.insert("is_back".into(), Value::Bool(true));
    if !ns.store().update(EntityKind::Borrow, &borrow.id, &borrow.fields)? {
        return Err(ns.not_found(&borrow.id));
    }

    let Some(book_id) = RecordId::from_json(&borrow.get("book")) else {
        return Ok(Value::Null);
    };
    let shelf = ns
        .store()
        .fetch(EntityKind::Book, &book_id)?
        .map(|book| book.get("shelf"))
        .unwrap_or(Value::Null);
    Ok(shelf)
}

/// Members may change their own password; changing someone else's needs
/// the edit level. A script acting for a member is not that member.
fn member_change_password(
    ns: &ActionNamespace,
    caller: &Caller,
    member: Record,
    args: Map<String, Value>,
) -> Result<Value, ActionError> {
    allow_args(&args, &["new_password"])?;
    let new_password = string_arg(&args, "new_password")?;
    let name = member.id.to_string();

    let identity = caller.identity();
    let is_self = identity.kind() == IdentityKind::Authenticated
        && identity.subject() == Some(name.as_str());
    if !is_self && !authorize(identity, ns.descriptor().required_level(&Operation::Edit)) {
        info!("access to Member.change_password denied to {identity}");
        return Err(ActionError::PermissionDenied {
            identity: identity.to_string(),
            operation: "Member.change_password".into(),
        });
    }

    ns.store().set_credential(&name, &hash_password(new_password)?)?;
    info!("{identity} changed the password of {member}");
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::actions::Namespaces;
    use crate::auth::{
        AuthPolicy, Authenticator, FreshCredential, Identity, LevelScale, verify_password,
    };
    use crate::entities::EntityRegistry;
    use crate::store::{Database, RecordStore};

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn setup() -> (Namespaces, Arc<dyn RecordStore>) {
        let store: Arc<dyn RecordStore> = Arc::new(Database::open_in_memory().unwrap());
        let ns = Namespaces::new(&EntityRegistry::builtin(), Arc::clone(&store), AuthPolicy::default());
        (ns, store)
    }

    fn root() -> Caller {
        Caller::new(Identity::privileged_internal(LevelScale::default()))
    }

    fn add_book(ns: &Namespaces, library: &str, groups: Value) -> RecordId {
        ns.get(EntityKind::Book)
            .create(
                &root(),
                obj(json!({
                    "isbn": 1, "author": "A", "title": "T", "year": 2000,
                    "library": library, "groups": groups,
                })),
            )
            .unwrap()
    }

    #[test]
    fn test_group_activate_moves_books() {
        let (ns, store) = setup();
        for lib in ["main", "store", "annex"] {
            ns.get(EntityKind::Library).create(&root(), obj(json!({"name": lib}))).unwrap();
        }
        ns.get(EntityKind::Group).create(&root(), obj(json!({"name": "summer"}))).unwrap();
        let in_store = add_book(&ns, "store", json!(["summer"]));
        let in_annex = add_book(&ns, "annex", json!(["summer"]));
        let other = add_book(&ns, "store", json!([]));

        let moved = ns
            .get(EntityKind::Group)
            .perform(
                &root(),
                &RecordId::from("summer"),
                "activate",
                obj(json!({"dest": "main", "src": ["store"]})),
            )
            .unwrap();
        assert_eq!(moved, json!(1));

        let library = |id: &RecordId| {
            store.fetch(EntityKind::Book, id).unwrap().unwrap().get("library")
        };
        assert_eq!(library(&in_store), json!("main"));
        assert_eq!(library(&in_annex), json!("annex"));
        assert_eq!(library(&other), json!("store"));
    }

    #[test]
    fn test_group_activate_unknown_destination() {
        let (ns, _) = setup();
        ns.get(EntityKind::Group).create(&root(), obj(json!({"name": "g"}))).unwrap();
        let err = ns
            .get(EntityKind::Group)
            .perform(&root(), &RecordId::from("g"), "activate", obj(json!({"dest": "nowhere"})))
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::NotFound { entity: EntityKind::Library, ref id } if id.to_string() == "nowhere"
        ));
    }

    #[test]
    fn test_group_activate_unknown_source() {
        let (ns, store) = setup();
        ns.get(EntityKind::Library).create(&root(), obj(json!({"name": "main"}))).unwrap();
        ns.get(EntityKind::Library).create(&root(), obj(json!({"name": "store"}))).unwrap();
        ns.get(EntityKind::Group).create(&root(), obj(json!({"name": "g"}))).unwrap();
        let book = add_book(&ns, "store", json!(["g"]));

        let err = ns
            .get(EntityKind::Group)
            .perform(
                &root(),
                &RecordId::from("g"),
                "activate",
                obj(json!({"dest": "main", "src": ["store", "typo_lib"]})),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::NotFound { entity: EntityKind::Library, ref id } if id.to_string() == "typo_lib"
        ));
        let library = store.fetch(EntityKind::Book, &book).unwrap().unwrap().get("library");
        assert_eq!(library, json!("store"));
    }

    #[test]
    fn test_restitute_once() {
        let (ns, _) = setup();
        ns.get(EntityKind::Library).create(&root(), obj(json!({"name": "main"}))).unwrap();
        ns.get(EntityKind::Person)
            .create(&root(), obj(json!({"id": 5, "first_name": "A", "last_name": "B", "class": "1"})))
            .unwrap();
        let book = add_book(&ns, "main", json!([]));
        ns.get(EntityKind::Book)
            .edit(&root(), &book, obj(json!({"shelf": "A1"})))
            .unwrap();
        let borrows = ns.get(EntityKind::Borrow);
        let id = borrows
            .create(
                &root(),
                obj(json!({"person": 5, "book": book.to_json(), "return_date": "2026-11-01"})),
            )
            .unwrap();

        let err = borrows.perform(&root(), &id, "restitute", obj(json!({"person": 6}))).unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));

        let shelf = borrows.perform(&root(), &id, "restitute", obj(json!({"person": 5}))).unwrap();
        assert_eq!(shelf, json!("A1"));
        assert_eq!(borrows.view(&root(), &id).unwrap().get("is_back"), json!(true));
        assert!(borrows.perform(&root(), &id, "restitute", Map::new()).is_err());
    }

    #[test]
    fn test_change_own_password() {
        let (ns, store) = setup();
        ns.get(EntityKind::Member)
            .create(&root(), obj(json!({"name": "alice", "level": 1, "password": "old"})))
            .unwrap();
        let auth = Authenticator::new(Arc::clone(&store), AuthPolicy::default());

        let alice = auth.login("alice", "old").unwrap();
        let caller = Caller::new(alice.clone());
        let members = ns.get(EntityKind::Member);
        let args = obj(json!({"new_password": "new"}));

        let err = members
            .perform(&caller, &RecordId::from("alice"), "change_password", args.clone())
            .unwrap_err();
        assert!(matches!(err, ActionError::ReauthenticationRequired { .. }));

        let fresh = caller.with_credential(auth.reauthenticate(&alice, "old").unwrap());
        members.perform(&fresh, &RecordId::from("alice"), "change_password", args).unwrap();
        let hash = store.credential("alice").unwrap().unwrap();
        assert!(verify_password("new", &hash).unwrap());
    }

    #[test]
    fn test_change_other_password_needs_edit_level() {
        let (ns, _) = setup();
        let members = ns.get(EntityKind::Member);
        members
            .create(&root(), obj(json!({"name": "bob", "level": 1, "password": "pw"})))
            .unwrap();

        let carol = Caller::new(Identity::authenticated("carol", 2))
            .with_credential(FreshCredential::new("carol", Utc::now()));
        let err = members
            .perform(&carol, &RecordId::from("bob"), "change_password", obj(json!({"new_password": "x"})))
            .unwrap_err();
        assert!(matches!(err, ActionError::PermissionDenied { .. }));
    }
}
