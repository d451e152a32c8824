//! Built-in entity descriptors.

use std::collections::BTreeMap;

use super::descriptor::{
    EntityDescriptor, EntityKind, FieldDefault, FieldSpec, FieldType, LevelTable,
};

use FieldType::{Boolean, Date, Integer, Level, Ref, RefList, Text, TextList};

pub fn descriptor(kind: EntityKind) -> EntityDescriptor {
    match kind {
        EntityKind::Book => book(),
        EntityKind::Person => person(),
        EntityKind::Library => library(),
        EntityKind::Group => group(),
        EntityKind::Borrow => borrow(),
        EntityKind::Member => member(),
        EntityKind::Script => script(),
    }
}

fn levels(new: u8, view: u8, actions: &[(&str, u8)]) -> LevelTable {
    LevelTable {
        new: Some(new),
        view: Some(view),
        search: None,
        edit: None,
        actions: actions.iter().map(|(k, v)| (k.to_string(), *v)).collect::<BTreeMap<_, _>>(),
    }
}

fn book() -> EntityDescriptor {
    EntityDescriptor {
        kind: EntityKind::Book,
        fields: vec![
            FieldSpec::required("isbn", Integer),
            FieldSpec::required("author", Text),
            FieldSpec::required("title", Text),
            FieldSpec::optional("series", Text),
            FieldSpec::optional("series_number", Integer),
            FieldSpec::optional("language", Text),
            FieldSpec::optional("publisher", Text),
            FieldSpec::optional("concerned_people", Text),
            FieldSpec::required("year", Integer),
            FieldSpec::optional("medium", Text),
            FieldSpec::optional("genres", TextList),
            FieldSpec::optional("groups", RefList(EntityKind::Group)),
            FieldSpec::optional("library", Ref(EntityKind::Library)),
            FieldSpec::optional("shelf", Text),
            FieldSpec::optional("is_active", Boolean).with_default(FieldDefault::Bool(true)),
        ],
        id_policy: EntityKind::Book.id_policy(),
        levels: levels(2, 0, &[]),
        actions: vec![],
        companions: vec![("series", "series_number")],
    }
}

fn person() -> EntityDescriptor {
    EntityDescriptor {
        kind: EntityKind::Person,
        fields: vec![
            FieldSpec::required("id", Integer),
            FieldSpec::required("first_name", Text),
            FieldSpec::required("last_name", Text),
            FieldSpec::required("class", Text),
            FieldSpec::optional("max_borrow", Integer).with_default(FieldDefault::Int(3)),
            FieldSpec::optional("libraries", RefList(EntityKind::Library)),
            FieldSpec::optional("pay_date", Date),
        ],
        id_policy: EntityKind::Person.id_policy(),
        levels: levels(3, 1, &[]),
        actions: vec![],
        companions: vec![],
    }
}

fn library() -> EntityDescriptor {
    EntityDescriptor {
        kind: EntityKind::Library,
        fields: vec![
            FieldSpec::required("name", Text),
            FieldSpec::optional("pay_required", Boolean).with_default(FieldDefault::Bool(false)),
            FieldSpec::optional("is_active", Boolean).with_default(FieldDefault::Bool(true)),
        ],
        id_policy: EntityKind::Library.id_policy(),
        levels: levels(3, 0, &[]),
        actions: vec![],
        companions: vec![],
    }
}

fn group() -> EntityDescriptor {
    EntityDescriptor {
        kind: EntityKind::Group,
        fields: vec![FieldSpec::required("name", Text)],
        id_policy: EntityKind::Group.id_policy(),
        levels: levels(3, 0, &[("activate", 3)]),
        actions: vec!["activate"],
        companions: vec![],
    }
}

fn borrow() -> EntityDescriptor {
    EntityDescriptor {
        kind: EntityKind::Borrow,
        fields: vec![
            FieldSpec::required("person", Ref(EntityKind::Person)),
            FieldSpec::required("book", Ref(EntityKind::Book)),
            FieldSpec::required("return_date", Date),
            FieldSpec::optional("is_back", Boolean).with_default(FieldDefault::Bool(false)),
        ],
        id_policy: EntityKind::Borrow.id_policy(),
        levels: levels(1, 1, &[("restitute", 1)]),
        actions: vec!["restitute"],
        companions: vec![],
    }
}

fn member() -> EntityDescriptor {
    EntityDescriptor {
        kind: EntityKind::Member,
        fields: vec![
            FieldSpec::required("name", Text),
            FieldSpec::required("level", Level),
            FieldSpec::secret("password"),
        ],
        id_policy: EntityKind::Member.id_policy(),
        levels: levels(4, 2, &[("change_password", 0)]),
        actions: vec!["change_password"],
        companions: vec![],
    }
}

fn script() -> EntityDescriptor {
    EntityDescriptor {
        kind: EntityKind::Script,
        fields: vec![
            FieldSpec::required("name", Text),
            FieldSpec::required("code", Text),
            FieldSpec::optional("setlevel", Level),
            FieldSpec::optional("permissions", TextList),
        ],
        id_policy: EntityKind::Script.id_policy(),
        levels: levels(4, 2, &[]),
        actions: vec![],
        companions: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Operation;

    #[test]
    fn test_book_levels() {
        let d = descriptor(EntityKind::Book);
        assert_eq!(d.required_level(&Operation::New), Some(2));
        assert_eq!(d.required_level(&Operation::View), Some(0));
        assert_eq!(d.required_level(&Operation::Search), Some(0));
        assert_eq!(d.required_level(&Operation::Edit), Some(2));
    }

    #[test]
    fn test_group_activate_level() {
        let d = descriptor(EntityKind::Group);
        assert_eq!(d.required_level(&Operation::Action("activate".into())), Some(3));
    }

    #[test]
    fn test_member_password_is_secret() {
        let d = descriptor(EntityKind::Member);
        assert!(d.field("password").unwrap().secret);
        assert!(!d.is_readable("password"));
        assert!(d.is_readable("level"));
        assert!(d.is_readable("id"));
    }

    #[test]
    fn test_every_kind_has_descriptor() {
        for kind in EntityKind::ALL {
            let d = descriptor(kind);
            assert_eq!(d.kind, kind);
            assert_eq!(d.id_policy, kind.id_policy());
        }
    }
}
