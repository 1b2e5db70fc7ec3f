//! The structured bridge: ScriptingBridge driven through `osascript -l JavaScript`.
//!
//! Every [`ObjectBridge`] call becomes one short JavaScript program. Handle tokens are
//! JavaScript expressions rooted at `app`, the `SBApplication` for Notes, so a handle
//! is re-evaluated on each use and never goes stale between calls. Element handles are
//! addressed by id when the host reports a usable one and by position otherwise.
//!
//! Results travel back as JSON produced by the `enc` helper below. Dates arrive as
//! `{"$date": seconds}` and object references as `{"$object": id}`.

use super::{Collection, ElementKind, Handle, ObjectBridge, Property, Value};
use crate::error::{NotesError, Result};
use crate::ident::Identifier;
use chrono::{DateTime, Utc};
use log::trace;
use serde_json::Value as Json;
use std::path::Path;
use std::process::Command;

const PRELUDE: &str = r#"ObjC.import('Foundation');
ObjC.import('ScriptingBridge');
const app = $.SBApplication.applicationWithBundleIdentifier('com.apple.Notes');
function enc(v) {
  if (v === undefined || v === null) return null;
  if (typeof v === 'boolean' || typeof v === 'number' || typeof v === 'string') return v;
  if (typeof v.isNil === 'function' && v.isNil()) return null;
  if (v.isKindOfClass($.NSNull)) return null;
  if (v.isKindOfClass($.NSString) || v.isKindOfClass($.NSNumber)) return ObjC.unwrap(v);
  if (v.isKindOfClass($.NSDate)) return { '$date': v.timeIntervalSince1970 };
  if (v.isKindOfClass($.NSArray)) {
    const out = [];
    for (let i = 0; i < v.count; i++) out.push(enc(v.objectAtIndex(i)));
    return out;
  }
  if (v.isKindOfClass($.SBObject)) {
    let id = null;
    try { id = ObjC.unwrap(v.id); } catch (e) {}
    return { '$object': id === undefined ? null : id };
  }
  return String(ObjC.unwrap(v));
}
"#;

/// Save-as type code for attachments: the file's native format.
const NATIVE_FORMAT: u32 = 1_769_235_821;

/// JavaScript expression for a handle.
fn expr(handle: &Handle) -> &str {
    if handle.is_application() {
        "app"
    } else {
        handle.token()
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

/// Element array of the collection's owner, before any filter.
fn elements_expr(collection: &Collection) -> String {
    format!("{}.{}", expr(collection.owner()), collection.kind().selector())
}

fn collection_expr(collection: &Collection) -> String {
    let elements = elements_expr(collection);
    match collection.predicate() {
        Some(predicate) => {
            let arguments: Vec<String> = predicate.arguments().iter().map(|a| quote(a)).collect();
            format!(
                "{}.filteredArrayUsingPredicate($.NSPredicate.predicateWithFormatArgumentArray({}, $([{}])))",
                elements,
                quote(&predicate.format()),
                arguments.join(", ")
            )
        }
        None => elements,
    }
}

fn by_id(owner: &str, kind: ElementKind, id: &str) -> Handle {
    Handle::new(format!("{}.{}.objectWithID({})", owner, kind.selector(), quote(id)))
}

fn literal(value: &Value) -> String {
    match value {
        Value::Missing => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Text(s) => quote(s),
        Value::Date(d) => format!("$.NSDate.dateWithTimeIntervalSince1970({})", d.timestamp()),
        Value::List(items) => format!(
            "[{}]",
            items.iter().map(literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(handle) => expr(handle).to_string(),
    }
}

/// Where an object reference found in a reply should point.
#[derive(Clone, Copy)]
enum Origin<'a> {
    /// Re-read the same expression; list members by position.
    Path(&'a str),
    /// Members of this element kind, by id when available.
    Elements(ElementKind),
}

fn object_handle(origin: Origin<'_>, index: Option<usize>, id: Option<&str>) -> Handle {
    let valid = id.map(Identifier::new).filter(Identifier::is_valid);
    match (origin, valid) {
        (Origin::Elements(kind), Some(id)) => by_id("app", kind, id.as_str()),
        (Origin::Elements(ElementKind::Notes), None) => match index {
            Some(i) => Handle::new(format!("app.selection.objectAtIndex({i})")),
            None => Handle::new("app.selection"),
        },
        (Origin::Elements(kind), None) => Handle::new(format!("app.{}", kind.selector())),
        (Origin::Path(path), _) => match index {
            Some(i) => Handle::new(format!("{path}.objectAtIndex({i})")),
            None => Handle::new(path),
        },
    }
}

fn from_json(json: Json, origin: Origin<'_>, index: Option<usize>) -> Value {
    match json {
        Json::Null => Value::Missing,
        Json::Bool(b) => Value::Bool(b),
        // NSNumber counts arrive as doubles; only whole values become integers.
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::Int(f as i64),
                _ => Value::Text(n.to_string()),
            },
        },
        Json::String(s) => Value::Text(s),
        Json::Array(items) => Value::List(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| from_json(item, origin, Some(i)))
                .collect(),
        ),
        Json::Object(map) => {
            if let Some(secs) = map.get("$date").and_then(Json::as_f64) {
                return DateTime::<Utc>::from_timestamp(secs.floor() as i64, 0)
                    .map(Value::Date)
                    .unwrap_or(Value::Missing);
            }
            match map.get("$object") {
                Some(id) => Value::Object(object_handle(origin, index, id.as_str())),
                None => Value::Missing,
            }
        }
    }
}

/// ScriptingBridge access to Notes.
#[derive(Debug, Default)]
pub struct JxaBridge {}

impl JxaBridge {
    pub fn new() -> Self {
        Self {}
    }

    /// Runs `body` (a JavaScript expression) and decodes its `enc`-ed result.
    fn eval(&self, operation: &str, body: &str) -> Result<Json> {
        let script = format!("{PRELUDE}JSON.stringify(enc({body}));\n");
        trace!("event=jxa operation={} body={}", operation, body);
        let output = Command::new("osascript")
            .arg("-l")
            .arg("JavaScript")
            .arg("-e")
            .arg(&script)
            .output()
            .map_err(|e| NotesError::host(operation, e.to_string()))?;
        if !output.status.success() {
            return Err(NotesError::host(
                operation,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(serde_json::from_str(stdout.trim())?)
    }
}

/// Script bodies, one per bridge operation.
mod scripts {
    use super::*;

    pub fn get(object: &Handle, property: Property) -> String {
        format!("{}.{}", expr(object), property.selector())
    }

    pub fn set(object: &Handle, property: Property, value: &Value) -> String {
        format!(
            "(() => {{ {}.setValueForKey({}, {}); return null; }})()",
            expr(object),
            literal(value),
            quote(property.selector())
        )
    }

    pub fn count(collection: &Collection) -> String {
        format!("{}.count", collection_expr(collection))
    }

    /// Ids of every element, `null` where the host has none.
    pub fn ids(collection: &Collection) -> String {
        format!(
            "(() => {{ const c = {}; const out = []; \
             for (let i = 0; i < c.count; i++) {{ let id = null; \
             try {{ id = ObjC.unwrap(c.objectAtIndex(i).id); }} catch (e) {{}} \
             out.push(id === undefined ? null : id); }} return out; }})()",
            collection_expr(collection)
        )
    }

    pub fn project(collection: &Collection, path: &[Property]) -> String {
        let mut body = collection_expr(collection);
        for property in path {
            body.push_str(&format!(".arrayByApplyingSelector({})", quote(property.selector())));
        }
        body
    }

    pub fn lookup(collection: &Collection, id: &str) -> String {
        format!(
            "(() => {{ const o = {}.objectWithID({}); \
             try {{ return ObjC.unwrap(o.id) === {} }} catch (e) {{ return false; }} }})()",
            elements_expr(collection),
            quote(id),
            quote(id)
        )
    }

    pub fn describe(object: &Handle) -> String {
        format!("{}.description", expr(object))
    }

    pub fn insert_note(folder: &Handle, body: &str) -> String {
        format!(
            "(() => {{ const notes = {}.notes; const before = notes.count; \
             const note = app.classForScriptingClass('note').alloc.initWithProperties($({{ body: {} }})); \
             notes.addObject(note); \
             if (notes.count <= before) throw new Error('note count did not grow'); \
             let id = null; try {{ id = ObjC.unwrap(note.id); }} catch (e) {{}} \
             return id === undefined ? null : id; }})()",
            expr(folder),
            quote(body)
        )
    }

    pub fn save(attachment: &Handle, destination: &Path) -> String {
        format!(
            "(() => {{ {}.saveInAs($.NSURL.fileURLWithPath({}), {}); return null; }})()",
            expr(attachment),
            quote(&destination.to_string_lossy()),
            NATIVE_FORMAT
        )
    }
}

impl ObjectBridge for JxaBridge {
    fn get(&self, object: &Handle, property: Property) -> Result<Value> {
        let path = scripts::get(object, property);
        let json = self.eval("get", &path)?;
        let origin = match property {
            Property::Selection => Origin::Elements(ElementKind::Notes),
            _ => Origin::Path(&path),
        };
        Ok(from_json(json, origin, None))
    }

    fn set(&self, object: &Handle, property: Property, value: &Value) -> Result<()> {
        self.eval("setValueForKey", &scripts::set(object, property, value))?;
        Ok(())
    }

    fn count(&self, collection: &Collection) -> Result<usize> {
        let json = self.eval("count", &scripts::count(collection))?;
        json.as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| NotesError::host("count", format!("unexpected reply {json}")))
    }

    fn handles(&self, collection: &Collection) -> Result<Vec<Handle>> {
        let json = self.eval("handles", &scripts::ids(collection))?;
        let positional = collection_expr(collection);
        let owner = expr(collection.owner());
        let ids = json.as_array().cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                match id.as_str().map(Identifier::new).filter(Identifier::is_valid) {
                    Some(id) => by_id(owner, collection.kind(), id.as_str()),
                    None => Handle::new(format!("{positional}.objectAtIndex({i})")),
                }
            })
            .collect())
    }

    fn project(&self, collection: &Collection, path: &[Property]) -> Result<Vec<Value>> {
        let json = self.eval("arrayByApplyingSelector", &scripts::project(collection, path))?;
        let mut base = collection_expr(collection);
        for property in path {
            base.push_str(&format!(".arrayByApplyingSelector({})", quote(property.selector())));
        }
        Ok(from_json(json, Origin::Path(&base), None).into_list())
    }

    fn lookup(&self, collection: &Collection, id: &str) -> Result<Option<Handle>> {
        let found = self.eval("objectWithID", &scripts::lookup(collection, id))?;
        if found.as_bool() == Some(true) {
            Ok(Some(by_id(
                expr(collection.owner()),
                collection.kind(),
                id,
            )))
        } else {
            Ok(None)
        }
    }

    fn describe(&self, object: &Handle) -> Result<String> {
        let json = self.eval("description", &scripts::describe(object))?;
        Ok(json.as_str().unwrap_or_default().to_string())
    }

    fn insert_note(&self, folder: &Handle, body: &str) -> Result<Handle> {
        let json = self.eval("addObject", &scripts::insert_note(folder, body))?;
        match json.as_str().map(Identifier::new).filter(Identifier::is_valid) {
            Some(id) => Ok(by_id(expr(folder), ElementKind::Notes, id.as_str())),
            // New notes sort first in their folder.
            None => Ok(Handle::new(format!("{}.notes.objectAtIndex(0)", expr(folder)))),
        }
    }

    fn save_attachment(&self, attachment: &Handle, destination: &Path) -> Result<()> {
        self.eval("saveInAs", &scripts::save(attachment, destination))?;
        Ok(())
    }
}
