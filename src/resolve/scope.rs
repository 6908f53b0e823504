//! Type-name lookup over the message nesting tree.
//!
//! Walk up from the declaring message one level at a time. At each level:
//! the level's own name may start the path; otherwise the path is searched
//! downward from that level. Only after all enclosing messages fail is the
//! schema root searched. The closest enclosing scope always wins.
use crate::schema::{EnumId, MessageId, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Root,
    Message(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    Message(MessageId),
    Enum(EnumId),
}

/// Resolve a possibly dotted, possibly relative type name as seen from `from`.
/// A leading dot makes the name absolute (root-relative).
pub fn lookup(schema: &Schema, from: MessageId, type_name: &str) -> Option<TypeRef> {
    if let Some(absolute) = type_name.strip_prefix('.') {
        let path = absolute.split('.').collect::<Vec<_>>();
        return search_down(schema, Scope::Root, &path);
    }
    let path = type_name.split('.').collect::<Vec<_>>();
    search_up(schema, from, &path)
}

fn search_up(schema: &Schema, from: MessageId, path: &[&str]) -> Option<TypeRef> {
    let mut level = Some(from);
    while let Some(id) = level {
        let m = schema.message(id);
        // the enclosing message itself binds the first segment; the rest must
        // then resolve inside it
        if m.name == path[0] {
            return match path {
                [_] => Some(TypeRef::Message(id)),
                [_, rest @ ..] => search_down(schema, Scope::Message(id), rest),
                [] => None,
            };
        }
        if let Some(found) = search_down(schema, Scope::Message(id), path) {
            return Some(found);
        }
        level = m.parent;
    }
    search_down(schema, Scope::Root, path)
}

/// Follow `path` through nested declarations starting at `scope`.
fn search_down(schema: &Schema, mut scope: Scope, mut path: &[&str]) -> Option<TypeRef> {
    loop {
        let (messages, enums) = children(schema, scope);
        let (head, rest) = path.split_first()?;
        if rest.is_empty() {
            if let Some(e) = enums.iter().find(|e| schema.enum_type(**e).name == *head) {
                return Some(TypeRef::Enum(*e));
            }
        }
        let sub = *messages.iter().find(|m| schema.message(**m).name == *head)?;
        if rest.is_empty() {
            return Some(TypeRef::Message(sub));
        }
        scope = Scope::Message(sub);
        path = rest;
    }
}

fn children(schema: &Schema, scope: Scope) -> (&[MessageId], &[EnumId]) {
    match scope {
        Scope::Root => (schema.roots(), schema.root_enums()),
        Scope::Message(id) => {
            let m = schema.message(id);
            (&m.messages, &m.enums)
        }
    }
}
