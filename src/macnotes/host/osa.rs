//! The legacy script bridge: one AppleScript library, compiled once per process.
//!
//! The library source below is compiled with `osacompile` into the cache directory on
//! first use. Every call then runs `osascript <compiled> <routine> <args…>`; a generated
//! `on run argv` handler dispatches on the routine name and prints the handler's result
//! as JSON, which is decoded back into a [`Value`].
//!
//! Calls block until the host answers. There is no timeout and no retry: a non-zero
//! exit becomes [`NotesError::Host`] carrying osascript's own message.

use super::{Routine, ScriptBridge, Value};
use crate::error::{NotesError, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use directories::ProjectDirs;
use log::{debug, trace};
use once_cell::sync::OnceCell;
use serde_json::Value as Json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

static COMPILED: OnceCell<PathBuf> = OnceCell::new();

const LIBRARY: &str = r#"
property JSON_NULL : "null"

on replaceText(theText, searchString, replacementString)
	set savedDelimiters to AppleScript's text item delimiters
	set AppleScript's text item delimiters to searchString
	set theItems to text items of theText
	set AppleScript's text item delimiters to replacementString
	set theText to theItems as text
	set AppleScript's text item delimiters to savedDelimiters
	return theText
end replaceText

on encodeText(theText)
	set theText to replaceText(theText, "\\", "\\\\")
	set theText to replaceText(theText, "\"", "\\\"")
	set theText to replaceText(theText, return, "\\r")
	set theText to replaceText(theText, linefeed, "\\n")
	set theText to replaceText(theText, tab, "\\t")
	set hexDigits to "0123456789abcdef"
	repeat with code from 0 to 31
		set theChar to character id code
		if theText contains theChar then
			set theText to replaceText(theText, theChar, "\\u00" & (character ((code div 16) + 1) of hexDigits) & (character ((code mod 16) + 1) of hexDigits))
		end if
	end repeat
	return "\"" & theText & "\""
end encodeText

on encodeValue(theValue)
	set theClass to class of theValue
	if theValue is missing value then
		return JSON_NULL
	else if theClass is list then
		set parts to {}
		repeat with theItem in theValue
			copy encodeValue(contents of theItem) to end of parts
		end repeat
		set savedDelimiters to AppleScript's text item delimiters
		set AppleScript's text item delimiters to ","
		set encoded to "[" & (parts as text) & "]"
		set AppleScript's text item delimiters to savedDelimiters
		return encoded
	else if theClass is boolean then
		if theValue then return "true"
		return "false"
	else if theClass is integer then
		return theValue as text
	else if theClass is real then
		return replaceText(theValue as text, ",", ".")
	else if theClass is date then
		set theDay to day of theValue
		set theMonth to (month of theValue) as integer
		set theYear to year of theValue
		set theSeconds to time of theValue
		return "{\"$date\":[" & theYear & "," & theMonth & "," & theDay & "," & theSeconds & "]}"
	else
		return encodeText(theValue as text)
	end if
end encodeValue

on noteID(theNote)
	return «class seld» of (theNote as record)
end noteID

on notesActivate()
	tell application "Notes" to activate
end notesActivate

on notesQuit()
	tell application "Notes" to quit
end notesQuit

on notesVersion()
	tell application "Notes" to return its version
end notesVersion

on notesGetAccounts()
	tell application "Notes" to return name of accounts
end notesGetAccounts

on notesGetDefaultAccount()
	tell application "Notes" to return name of default account
end notesGetDefaultAccount

on notesGetSelected()
	set selectedIDs to {}
	tell application "Notes"
		repeat with theNote in (selection as list)
			copy my noteID(theNote) to end of selectedIDs
		end repeat
	end tell
	set pairs to {}
	repeat with theID in selectedIDs
		copy {noteGetAccount(contents of theID), (contents of theID) as text} to end of pairs
	end repeat
	return pairs
end notesGetSelected

on notesMakeNote(noteName, noteBody)
	tell application "Notes"
		set theNote to make new note with properties {name:noteName, body:noteBody}
		return my noteID(theNote)
	end tell
end notesMakeNote

on notesMakeNoteWithAccount(accountName, folderName, noteName, noteBody)
	tell application "Notes"
		tell account accountName
			set theNote to make new note at folder folderName with properties {name:noteName, body:noteBody}
			return my noteID(theNote)
		end tell
	end tell
end notesMakeNoteWithAccount

on noteGetAccount(theID)
	tell application "Notes"
		repeat with accountName in (name of accounts)
			tell account accountName
				try
					set theNote to note id theID
					return accountName as text
				end try
			end tell
		end repeat
	end tell
	error "Can't get account of note id \"" & theID & "\"." number -1728
end noteGetAccount

on noteGetName(accountName, theID)
	tell application "Notes" to tell account accountName to return name of note id theID
end noteGetName

on noteSetName(accountName, theID, noteName)
	tell application "Notes" to tell account accountName to set name of note id theID to noteName
end noteSetName

on noteGetBody(accountName, theID)
	tell application "Notes" to tell account accountName to return body of note id theID
end noteGetBody

on noteSetBody(accountName, theID, noteBody)
	tell application "Notes" to tell account accountName to set body of note id theID to noteBody
end noteSetBody

on noteGetPlainText(accountName, theID)
	tell application "Notes" to tell account accountName to return plaintext of note id theID
end noteGetPlainText

on noteGetCreationDate(accountName, theID)
	tell application "Notes" to tell account accountName to return creation date of note id theID
end noteGetCreationDate

on noteGetModificationDate(accountName, theID)
	tell application "Notes" to tell account accountName to return modification date of note id theID
end noteGetModificationDate

on noteGetPasswordProtected(accountName, theID)
	tell application "Notes" to tell account accountName to return password protected of note id theID
end noteGetPasswordProtected

on noteGetContainer(accountName, theID)
	tell application "Notes"
		tell account accountName
			set folderID to «class seld» of ((container of note id theID) as record)
			return name of (first folder whose id is folderID)
		end tell
	end tell
end noteGetContainer

on noteShow(accountName, theID)
	tell application "Notes" to tell account accountName to show note id theID
end noteShow

on noteAddAttachment(accountName, theID, filePath)
	tell application "Notes"
		tell account accountName
			set theAttachment to make new attachment at end of attachments of note id theID with data (POSIX file filePath)
			return id of theAttachment
		end tell
	end tell
end noteAddAttachment

on folderGetName(accountName, folderID)
	tell application "Notes" to tell account accountName to return name of (first folder whose id is folderID)
end folderGetName

on folderShow(accountName, folderID)
	tell application "Notes" to tell account accountName to show folder id folderID
end folderShow

on accountID(accountName)
	tell application "Notes" to tell account accountName to return its id
end accountID

on accountGetDefaultFolder(accountName)
	tell application "Notes" to tell account accountName to return name of default folder
end accountGetDefaultFolder

on accountGetFolderNames(accountName)
	tell application "Notes" to tell account accountName to return name of every folder
end accountGetFolderNames

on accountGetCount(accountName)
	tell application "Notes" to tell account accountName to return count of notes
end accountGetCount

on accountShow(accountName)
	tell application "Notes" to tell account accountName to show
end accountShow

on accountFindWithName(accountName, nameText)
	tell application "Notes" to tell account accountName to return id of every note whose name is nameText
end accountFindWithName

on accountFindWithText(accountName, searchText)
	tell application "Notes" to tell account accountName to return id of every note whose name contains searchText or plaintext contains searchText
end accountFindWithText
"#;

/// `on run argv` handler dispatching to every routine.
fn dispatcher() -> String {
    let mut script = String::from("\non run argv\n\tset routineName to item 1 of argv\n");
    for routine in Routine::ALL {
        let args: Vec<String> = (0..routine.arity())
            .map(|i| format!("item {} of argv", i + 2))
            .collect();
        let call = format!("{}({})", routine.name(), args.join(", "));
        script.push_str(&format!("\tif routineName is \"{}\" then\n", routine.name()));
        if routine.returns_value() {
            script.push_str(&format!("\t\treturn encodeValue({call})\n"));
        } else {
            script.push_str(&format!("\t\t{call}\n\t\treturn JSON_NULL\n"));
        }
        script.push_str("\tend if\n");
    }
    script.push_str("\terror \"Unknown routine \" & routineName number -1708\nend run\n");
    script
}

/// The full library source, as compiled.
pub fn library_source() -> String {
    format!("{LIBRARY}{}", dispatcher())
}

/// Decode the library's JSON reply.
pub fn decode(reply: &str) -> Result<Value> {
    let json: Json = serde_json::from_str(reply.trim())?;
    Ok(from_json(json))
}

fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Missing,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Text(n.to_string()),
        },
        Json::String(s) => Value::Text(s),
        Json::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        Json::Object(map) => match map.get("$date").and_then(decode_date) {
            Some(date) => Value::Date(date),
            None => Value::Missing,
        },
    }
}

fn decode_date(parts: &Json) -> Option<DateTime<Utc>> {
    decode_date_in(parts, &Local)
}

/// `[year, month, day, seconds of day]` as wall-clock time in `tz`.
///
/// The offset is looked up for the date itself, so dates across a daylight saving
/// change convert correctly. Trailing elements are ignored. A wall-clock time skipped
/// by a DST gap resolves one hour later.
fn decode_date_in<Tz: TimeZone>(parts: &Json, tz: &Tz) -> Option<DateTime<Utc>> {
    let parts: Vec<i64> = parts
        .as_array()?
        .iter()
        .map(Json::as_i64)
        .collect::<Option<_>>()?;
    let [year, month, day, seconds, ..] = parts[..] else {
        return None;
    };
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
    let local = date.and_hms_opt(0, 0, 0)? + Duration::seconds(seconds);
    let resolved = tz
        .from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())?;
    Some(resolved.with_timezone(&Utc))
}

fn to_arg(value: &Value) -> String {
    match value {
        Value::Missing => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Text(s) => s.clone(),
        Value::Date(d) => d.to_rfc3339(),
        Value::List(items) => items.iter().map(to_arg).collect::<Vec<_>>().join(","),
        Value::Object(handle) => handle.token().to_string(),
    }
}

/// Runs routines of the compiled library through `osascript`.
pub struct OsaScriptBridge {
    compiled: PathBuf,
}

impl OsaScriptBridge {
    /// Compile the library on first use in this process and reuse it afterwards.
    pub fn load() -> Result<Self> {
        let compiled = COMPILED.get_or_try_init(compile_library)?;
        Ok(Self {
            compiled: compiled.clone(),
        })
    }

    pub fn compiled(&self) -> &Path {
        &self.compiled
    }
}

fn cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "macnotesapp")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
}

fn compile_library() -> Result<PathBuf> {
    let dir = cache_dir();
    fs::create_dir_all(&dir)?;
    let source = dir.join("macnotes.applescript");
    let compiled = dir.join(format!("macnotes-{}.scpt", env!("CARGO_PKG_VERSION")));
    fs::write(&source, library_source())?;

    debug!("event=compile_library path={}", compiled.display());
    let output = Command::new("osacompile")
        .arg("-o")
        .arg(&compiled)
        .arg(&source)
        .output()
        .map_err(|e| NotesError::host("osacompile", e.to_string()))?;
    if !output.status.success() {
        return Err(NotesError::host(
            "osacompile",
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(compiled)
}

impl ScriptBridge for OsaScriptBridge {
    fn call(&self, routine: Routine, args: &[Value]) -> Result<Value> {
        routine.check_arity(args)?;
        trace!("event=osascript routine={}", routine);
        let output = Command::new("osascript")
            .arg(&self.compiled)
            .arg(routine.name())
            .args(args.iter().map(to_arg))
            .output()
            .map_err(|e| NotesError::host(routine.name(), e.to_string()))?;
        if !output.status.success() {
            return Err(NotesError::host(
                routine.name(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        decode(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_covers_every_routine() {
        let source = library_source();
        for routine in Routine::ALL {
            assert!(
                source.contains(&format!("on {}(", routine.name())),
                "missing handler {}",
                routine
            );
            assert!(source.contains(&format!("if routineName is \"{}\"", routine.name())));
        }
    }

    #[test]
    fn dispatcher_passes_positional_arguments() {
        let source = dispatcher();
        assert!(source.contains(
            "return encodeValue(notesMakeNoteWithAccount(item 2 of argv, item 3 of argv, item 4 of argv, item 5 of argv))"
        ));
        assert!(source.contains("\t\tnoteShow(item 2 of argv, item 3 of argv)\n\t\treturn JSON_NULL\n"));
        assert!(source.contains("return encodeValue(notesVersion())"));
    }

    #[test]
    fn decodes_scalars_and_lists() {
        assert_eq!(decode("null\n").unwrap(), Value::Missing);
        assert_eq!(decode("true").unwrap(), Value::Bool(true));
        assert_eq!(decode("42").unwrap(), Value::Int(42));
        assert_eq!(
            decode(r#"[["iCloud","x-coredata://A/ICNote/p1"]]"#).unwrap(),
            Value::List(vec![Value::List(vec![
                Value::from("iCloud"),
                Value::from("x-coredata://A/ICNote/p1"),
            ])])
        );
    }

    #[test]
    fn decodes_wall_clock_dates_to_utc() {
        let plus_one = chrono::FixedOffset::east_opt(3600).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 11, 30, 0).unwrap();
        let parts = serde_json::json!([2024, 3, 5, 45000]);
        assert_eq!(decode_date_in(&parts, &plus_one), Some(expected));
        // Replies from an older library carry a trailing offset; it is ignored.
        let parts = serde_json::json!([2024, 3, 5, 45000, 7200]);
        assert_eq!(decode_date_in(&parts, &plus_one), Some(expected));
    }

    #[test]
    fn local_dates_use_the_offset_of_their_own_day() {
        for (month, day) in [(1, 15), (7, 15)] {
            let reply = format!(r#"{{"$date":[2024,{month},{day},45000]}}"#);
            let Value::Date(date) = decode(&reply).unwrap() else {
                panic!("expected a date for month {month}");
            };
            let wall = NaiveDate::from_ymd_opt(2024, month, day)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap();
            assert_eq!(date.with_timezone(&Local).naive_local(), wall);
        }
    }

    #[test]
    fn every_control_character_is_escaped() {
        let source = library_source();
        assert!(source.contains("repeat with code from 0 to 31"));
        assert!(source.contains("\\\\u00"));
        assert_eq!(
            decode(r#""bell\u0007 and\u001f unit""#).unwrap(),
            Value::from("bell\u{7} and\u{1f} unit")
        );
    }

    #[test]
    fn malformed_reply_is_an_error() {
        assert!(matches!(
            decode("<<script>>"),
            Err(NotesError::Serialization(_))
        ));
        assert_eq!(decode(r#"{"$date":[2024]}"#).unwrap(), Value::Missing);
    }

    #[test]
    fn arguments_are_plain_strings() {
        assert_eq!(to_arg(&Value::from("iCloud")), "iCloud");
        assert_eq!(to_arg(&Value::Int(3)), "3");
        assert_eq!(to_arg(&Value::Missing), "");
    }
}
