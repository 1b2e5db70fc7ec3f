//! Note filters and their compiled predicates.
//!
//! A [`NoteFilter`] is what callers ask for. [`compile`] turns it into one [`Predicate`]:
//! an AND of OR-groups, one group per supplied category. A note is selected only if it
//! matches at least one term in every category that was supplied.
//!
//! The predicate renders to the host's positional format string (`%@` placeholders)
//! and an argument list. Both are derived from the same clause list, so argument `n`
//! always belongs to placeholder `n`.

use crate::error::Result;
use crate::host::{Property, Value};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Note fields a predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Plaintext,
    Id,
    PasswordProtected,
}

impl Field {
    pub fn key(&self) -> &'static str {
        self.property().selector()
    }

    pub fn property(&self) -> Property {
        match self {
            Field::Name => Property::Name,
            Field::Plaintext => Property::Plaintext,
            Field::Id => Property::Id,
            Field::PasswordProtected => Property::PasswordProtected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Case and diacritic insensitive substring match.
    Contains(Field, String),
    Equals(Field, String),
    Is(Field, bool),
}

impl Clause {
    pub fn field(&self) -> Field {
        match self {
            Clause::Contains(f, _) | Clause::Equals(f, _) | Clause::Is(f, _) => *f,
        }
    }

    fn format(&self) -> String {
        match self {
            Clause::Contains(f, _) => format!("({} contains[cd] %@)", f.key()),
            Clause::Equals(f, _) => format!("({} == %@)", f.key()),
            Clause::Is(f, true) => format!("({} == TRUE)", f.key()),
            Clause::Is(f, false) => format!("({} == FALSE)", f.key()),
        }
    }

    fn argument(&self) -> Option<&str> {
        match self {
            Clause::Contains(_, arg) | Clause::Equals(_, arg) => Some(arg),
            Clause::Is(..) => None,
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Clause::Contains(_, term) => value
                .as_text()
                .map(|text| fold(text).contains(&fold(term)))
                .unwrap_or(false),
            Clause::Equals(_, expected) => value.as_text() == Some(expected.as_str()),
            Clause::Is(_, expected) => value.as_bool() == Some(*expected),
        }
    }
}

/// AND of OR-groups. No groups matches everything; an empty group matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Predicate {
    groups: Vec<Vec<Clause>>,
}

impl Predicate {
    /// A single OR-group.
    pub fn any_of(clauses: Vec<Clause>) -> Self {
        Self {
            groups: vec![clauses],
        }
    }

    /// Matches no element at all.
    pub fn never() -> Self {
        Self::any_of(Vec::new())
    }

    /// `field == id` for each id, OR-ed.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::any_of(
            ids.into_iter()
                .map(|id| Clause::Equals(Field::Id, id.into()))
                .collect(),
        )
    }

    /// `name == n` for each name, OR-ed. Used for account and folder lookups.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::any_of(
            names
                .into_iter()
                .map(|n| Clause::Equals(Field::Name, n.into()))
                .collect(),
        )
    }

    pub fn and(mut self, other: Predicate) -> Self {
        self.groups.extend(other.groups);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[Vec<Clause>] {
        &self.groups
    }

    /// The positional format string, e.g. `((name contains[cd] %@)) AND ((id == %@))`.
    pub fn format(&self) -> String {
        if self.groups.is_empty() {
            return "TRUEPREDICATE".to_string();
        }
        let groups: Vec<String> = self
            .groups
            .iter()
            .map(|group| {
                if group.is_empty() {
                    "FALSEPREDICATE".to_string()
                } else {
                    group
                        .iter()
                        .map(Clause::format)
                        .collect::<Vec<_>>()
                        .join(" OR ")
                }
            })
            .collect();
        format!("({})", groups.join(") AND ("))
    }

    /// Arguments for the `%@` placeholders, in placeholder order.
    pub fn arguments(&self) -> Vec<String> {
        self.groups
            .iter()
            .flatten()
            .filter_map(Clause::argument)
            .map(str::to_string)
            .collect()
    }

    /// Split into (groups where every field satisfies `keep`, the remaining groups).
    ///
    /// Groups are AND-ed, so evaluating the halves separately and intersecting gives the
    /// same selection as evaluating the whole.
    pub fn partition(self, keep: impl Fn(Field) -> bool) -> (Predicate, Predicate) {
        let (kept, rest): (Vec<_>, Vec<_>) = self
            .groups
            .into_iter()
            .partition(|group| group.iter().all(|c| keep(c.field())));
        (Predicate { groups: kept }, Predicate { groups: rest })
    }

    /// Evaluate locally, reading each needed field through `lookup`.
    ///
    /// Fields are read at most once per call.
    pub fn matches_with(&self, mut lookup: impl FnMut(Field) -> Result<Value>) -> Result<bool> {
        let mut seen: Vec<(Field, Value)> = Vec::new();
        for group in &self.groups {
            let mut hit = false;
            for clause in group {
                let field = clause.field();
                let value = match seen.iter().find(|(f, _)| *f == field) {
                    Some((_, v)) => v.clone(),
                    None => {
                        let v = lookup(field)?;
                        seen.push((field, v.clone()));
                        v
                    }
                };
                if clause.matches(&value) {
                    hit = true;
                    break;
                }
            }
            if !hit {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// A structured note query. Empty lists and `None` mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteFilter {
    pub name: Vec<String>,
    pub body: Vec<String>,
    /// Matches name OR body.
    pub text: Vec<String>,
    pub password_protected: Option<bool>,
    pub id: Vec<String>,
    /// Restricts which accounts are visited; applied before the content filter.
    pub accounts: Vec<String>,
}

impl NoteFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, term: impl Into<String>) -> Self {
        self.name.push(term.into());
        self
    }

    pub fn body(mut self, term: impl Into<String>) -> Self {
        self.body.push(term.into());
        self
    }

    pub fn text(mut self, term: impl Into<String>) -> Self {
        self.text.push(term.into());
        self
    }

    pub fn password_protected(mut self, protected: bool) -> Self {
        self.password_protected = Some(protected);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id.push(id.into());
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.accounts.push(account.into());
        self
    }
}

/// Compile the content part of a filter. `None` when no content constraint was given.
pub fn compile(filter: &NoteFilter) -> Option<Predicate> {
    let mut predicate = Predicate::default();

    if !filter.name.is_empty() {
        predicate = predicate.and(contains_any(Field::Name, &filter.name));
    }
    if !filter.body.is_empty() {
        predicate = predicate.and(contains_any(Field::Plaintext, &filter.body));
    }
    if !filter.text.is_empty() {
        let mut clauses = contains_clauses(Field::Name, &filter.text);
        clauses.extend(contains_clauses(Field::Plaintext, &filter.text));
        predicate = predicate.and(Predicate::any_of(clauses));
    }
    if let Some(protected) = filter.password_protected {
        predicate = predicate.and(Predicate::any_of(vec![Clause::Is(
            Field::PasswordProtected,
            protected,
        )]));
    }
    if !filter.id.is_empty() {
        predicate = predicate.and(Predicate::ids(filter.id.iter().cloned()));
    }

    (!predicate.is_empty()).then_some(predicate)
}

/// Scope selection: `name == a OR name == b ...` over accounts.
pub fn accounts_predicate(accounts: &[String]) -> Option<Predicate> {
    (!accounts.is_empty()).then(|| Predicate::names(accounts.iter().cloned()))
}

fn contains_clauses(field: Field, terms: &[String]) -> Vec<Clause> {
    terms
        .iter()
        .map(|t| Clause::Contains(field, t.clone()))
        .collect()
}

fn contains_any(field: Field, terms: &[String]) -> Predicate {
    Predicate::any_of(contains_clauses(field, terms))
}

/// Lowercase, decompose (NFD) and drop combining marks, for `[cd]` comparisons.
pub fn fold(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(name: &str, plaintext: &str, protected: bool) -> impl Fn(Field) -> Result<Value> {
        let name = name.to_string();
        let plaintext = plaintext.to_string();
        move |field| {
            Ok(match field {
                Field::Name => Value::Text(name.clone()),
                Field::Plaintext => Value::Text(plaintext.clone()),
                Field::Id => Value::Text("x-coredata://A/ICNote/p1".into()),
                Field::PasswordProtected => Value::Bool(protected),
            })
        }
    }

    #[test]
    fn empty_filter_compiles_to_nothing() {
        assert_eq!(compile(&NoteFilter::new()), None);
        assert_eq!(compile(&NoteFilter::new().account("iCloud")), None);
    }

    #[test]
    fn name_and_body_are_separate_and_groups() {
        let p = compile(&NoteFilter::new().name("a").name("b").body("c")).unwrap();
        assert_eq!(
            p.format(),
            "((name contains[cd] %@) OR (name contains[cd] %@)) AND ((plaintext contains[cd] %@))"
        );
        assert_eq!(p.arguments(), vec!["a", "b", "c"]);
    }

    #[test]
    fn text_expands_into_name_and_body_clauses() {
        let p = compile(&NoteFilter::new().text("x").text("y")).unwrap();
        assert_eq!(
            p.format(),
            "((name contains[cd] %@) OR (name contains[cd] %@) OR (plaintext contains[cd] %@) OR (plaintext contains[cd] %@))"
        );
        assert_eq!(p.arguments(), vec!["x", "y", "x", "y"]);
    }

    #[test]
    fn arguments_follow_category_order() {
        let filter = NoteFilter::new()
            .id("id-1")
            .password_protected(false)
            .text("t")
            .body("b")
            .name("n");
        let p = compile(&filter).unwrap();
        assert_eq!(
            p.format(),
            "((name contains[cd] %@)) AND ((plaintext contains[cd] %@)) AND \
             ((name contains[cd] %@) OR (plaintext contains[cd] %@)) AND \
             ((passwordProtected == FALSE)) AND ((id == %@))"
        );
        assert_eq!(p.arguments(), vec!["n", "b", "t", "t", "id-1"]);
        assert_eq!(p.format().matches("%@").count(), p.arguments().len());
    }

    #[test]
    fn accounts_predicate_ors_exact_names() {
        let p = accounts_predicate(&["iCloud".into(), "Gmail".into()]).unwrap();
        assert_eq!(p.format(), "((name == %@) OR (name == %@))");
        assert!(accounts_predicate(&[]).is_none());
    }

    #[test]
    fn never_and_empty_render() {
        assert_eq!(Predicate::never().format(), "(FALSEPREDICATE)");
        assert_eq!(Predicate::default().format(), "TRUEPREDICATE");
    }

    #[test]
    fn name_and_body_select_the_intersection() {
        let p = compile(&NoteFilter::new().name("shop").body("milk")).unwrap();
        assert!(p.matches_with(note("Shopping", "milk, eggs", false)).unwrap());
        assert!(!p.matches_with(note("Shopping", "bread", false)).unwrap());
        assert!(!p.matches_with(note("Recipe", "milk", false)).unwrap());
    }

    #[test]
    fn text_selects_the_union() {
        let p = compile(&NoteFilter::new().text("eggs")).unwrap();
        assert!(p.matches_with(note("Shopping", "milk, eggs", false)).unwrap());
        assert!(p.matches_with(note("Eggs Benedict", "", false)).unwrap());
        assert!(!p.matches_with(note("Recipe", "flour", false)).unwrap());
    }

    #[test]
    fn contains_ignores_case_and_diacritics() {
        let p = compile(&NoteFilter::new().name("CAFE")).unwrap();
        assert!(p.matches_with(note("Café list", "", false)).unwrap());
    }

    #[test]
    fn fold_strips_marks_beyond_latin_1() {
        assert_eq!(fold("Ångström"), "angstrom");
        assert_eq!(fold("Dvořák"), "dvorak");
        assert_eq!(fold("Ελληνικά"), "ελληνικα");
        // Precomposed and decomposed input fold the same way.
        assert_eq!(fold("re\u{301}sume\u{301}"), fold("résumé"));
        let p = compile(&NoteFilter::new().name("nguyen")).unwrap();
        assert!(p.matches_with(note("Nguyễn family", "", false)).unwrap());
    }

    #[test]
    fn partition_moves_whole_groups() {
        let p = compile(&NoteFilter::new().name("a").password_protected(true)).unwrap();
        let (structured, residual) = p.partition(|f| f != Field::PasswordProtected);
        assert_eq!(structured.format(), "((name contains[cd] %@))");
        assert_eq!(residual.format(), "((passwordProtected == TRUE))");
        assert!(residual.arguments().is_empty());
    }

    #[test]
    fn matches_reads_each_field_once() {
        let p = compile(&NoteFilter::new().name("x").name("y").name("z")).unwrap();
        let mut reads = 0;
        let hit = p
            .matches_with(|_| {
                reads += 1;
                Ok(Value::Text("nothing".into()))
            })
            .unwrap();
        assert!(!hit);
        assert_eq!(reads, 1);
    }
}
