//! Queryable HTML/XML trees for fetched markup.
//!
//! In Lua a node exposes `text`, `attrs` and `name` fields and the methods
//! `node:select(css)` (a list) and `node:select_one(css)` (a node or nil).

use std::rc::Rc;

use ego_tree::NodeId;
use mlua::{MetaMethod, Result as LuaResult, UserData, UserDataFields, UserDataMethods};
use scraper::{ElementRef, Html, Selector};

/// A node is kept as its id in the shared document tree.
#[derive(Clone)]
pub struct HtmlNode {
    doc: Rc<Html>,
    id: NodeId,
}

impl HtmlNode {
    /// Parse a whole document; the node is its root element.
    pub fn parse(markup: &str) -> Self {
        let doc = Rc::new(Html::parse_document(markup));
        let id = doc.root_element().id();
        Self { doc, id }
    }

    fn element(&self) -> LuaResult<ElementRef<'_>> {
        self.doc
            .tree
            .get(self.id)
            .and_then(ElementRef::wrap)
            .ok_or_else(|| mlua::Error::runtime("HTML node is not an element"))
    }

    fn child(&self, element: ElementRef<'_>) -> Self {
        Self { doc: Rc::clone(&self.doc), id: element.id() }
    }

    pub fn text(&self) -> LuaResult<String> {
        Ok(self.element()?.text().collect())
    }

    pub fn select(&self, css: &str) -> LuaResult<Vec<HtmlNode>> {
        let selector = parse_selector(css)?;
        Ok(self.element()?.select(&selector).map(|e| self.child(e)).collect())
    }

    pub fn select_one(&self, css: &str) -> LuaResult<Option<HtmlNode>> {
        let selector = parse_selector(css)?;
        Ok(self.element()?.select(&selector).next().map(|e| self.child(e)))
    }
}

fn parse_selector(css: &str) -> LuaResult<Selector> {
    Selector::parse(css)
        .map_err(|e| mlua::Error::runtime(format!("invalid selector '{css}': {e}")))
}

impl UserData for HtmlNode {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("text", |_, this| this.text());
        fields.add_field_method_get("name", |_, this| {
            Ok(this.element()?.value().name().to_string())
        });
        fields.add_field_method_get("attrs", |lua, this| {
            let attrs = lua.create_table()?;
            for (key, value) in this.element()?.value().attrs() {
                attrs.set(key, value)?;
            }
            Ok(attrs)
        });
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("select", |_, this, css: String| this.select(&css));
        methods.add_method("select_one", |_, this, css: String| this.select_one(&css));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.element()?.html()));
    }
}
