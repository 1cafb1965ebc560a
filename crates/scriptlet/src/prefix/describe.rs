//! Member-summary handlers and their rendering.

use async_trait::async_trait;

use super::{HandlerKind, Invocation, Prefix, PrefixHandler};
use crate::{
    error::ExecError,
    service::{Member, MemberKind, TypeShape},
    value::Value,
};

/// Width at which a group's term list wraps.
const LINE_WIDTH: usize = 80;
const TERM_SEPARATOR: &str = ", ";

/// Runs `return <code>` and summarises the members of the result's type.
#[derive(Debug, Clone)]
pub struct DescribeValueHandler {
    prefix: Prefix,
}

impl DescribeValueHandler {
    #[must_use]
    pub fn new(prefix: Prefix) -> Self {
        Self { prefix }
    }
}

#[async_trait]
impl PrefixHandler for DescribeValueHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::DescribeValue
    }

    fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    async fn handle_inner(&self, inv: &Invocation, code: &str) -> Result<(), ExecError> {
        let value = inv.run(&format!("return {code}")).await?;
        let type_name = value
            .type_name()
            .ok_or_else(|| ExecError::UnexpectedResult("null has no runtime type".to_owned()))?;
        print_shape(inv, type_name).await
    }
}

/// Resolves `typeof(<code>)` and summarises the members of that type.
#[derive(Debug, Clone)]
pub struct DescribeTypeHandler {
    prefix: Prefix,
}

impl DescribeTypeHandler {
    #[must_use]
    pub fn new(prefix: Prefix) -> Self {
        Self { prefix }
    }
}

#[async_trait]
impl PrefixHandler for DescribeTypeHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::DescribeType
    }

    fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    fn add_semicolon(&self) -> bool {
        false
    }

    async fn handle_inner(&self, inv: &Invocation, code: &str) -> Result<(), ExecError> {
        match inv.run(&format!("return typeof({code});")).await? {
            Value::Type(type_name) => print_shape(inv, &type_name).await,
            other => Err(ExecError::UnexpectedResult(format!("expected a type, got {other}"))),
        }
    }
}

async fn print_shape(inv: &Invocation, type_name: &str) -> Result<(), ExecError> {
    let shape = inv.describe(type_name).await?;
    if let Some(text) = render_type_shape(&shape) {
        inv.print(&text);
    }
    Ok(())
}

/// Renders a grouped member summary; `None` when no member is displayable.
///
/// ```text
/// int {
///   Fields: [int MaxValue], [int MinValue]
///   Methods:
///     [string ToString()], [int CompareTo(int value)], ...
///     [bool Equals(object obj)]
/// }
/// ```
#[must_use]
pub fn render_type_shape(shape: &TypeShape) -> Option<String> {
    let groups = [
        ("Types", visible(shape, |k| matches!(k, MemberKind::NestedType), true)),
        ("Fields", visible(shape, |k| matches!(k, MemberKind::Field), true)),
        ("Properties", visible(shape, |k| matches!(k, MemberKind::Property), true)),
        ("Constructors", visible(shape, |k| matches!(k, MemberKind::Constructor), false)),
        ("Methods", visible(shape, |k| matches!(k, MemberKind::Method), true)),
        ("Other", visible(shape, |k| matches!(k, MemberKind::Other(_)), false)),
    ];

    let mut lines = Vec::new();
    for (group, terms) in groups {
        if terms.is_empty() {
            continue;
        }
        match paginate(&terms).as_slice() {
            [single] => lines.push(format!("  {group}: {single}")),
            many => {
                lines.push(format!("  {group}:"));
                lines.extend(many.iter().map(|line| format!("    {line}")));
            }
        }
    }
    (!lines.is_empty()).then(|| format!("{} {{\n{}\n}}", shape.name, lines.join("\n")))
}

fn visible(shape: &TypeShape, kind: fn(&MemberKind) -> bool, hide_special: bool) -> Vec<String> {
    shape
        .members
        .iter()
        .filter(|m| kind(&m.kind) && !(hide_special && m.special_name))
        .map(render_member)
        .collect()
}

fn render_member(member: &Member) -> String {
    let typed = |name: &str| match &member.type_name {
        Some(type_name) => format!("{type_name} {name}"),
        None => name.to_owned(),
    };
    match &member.kind {
        MemberKind::NestedType => member.name.clone(),
        MemberKind::Field | MemberKind::Property => format!("[{}]", typed(&member.name)),
        MemberKind::Constructor | MemberKind::Method => {
            let params = member
                .params
                .iter()
                .map(|p| format!("{} {}", p.type_name, p.name))
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{}({params})]", typed(&member.name))
        }
        MemberKind::Other(category) => format!("[{category} {}]", member.name),
    }
}

/// Packs terms into comma-separated lines no wider than [`LINE_WIDTH`].
///
/// Every line but the last keeps its trailing comma.
#[must_use]
pub fn paginate(terms: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for term in terms {
        if !line.is_empty() && line.len() + term.len() + TERM_SEPARATOR.len() >= LINE_WIDTH {
            lines.push(line.trim_end().to_owned());
            line.clear();
        }
        line.push_str(term);
        line.push_str(TERM_SEPARATOR);
    }
    if !line.is_empty() {
        line.truncate(line.len() - TERM_SEPARATOR.len());
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn paginate_wraps_at_line_width() {
        let terms: Vec<String> = (0..12).map(|i| format!("[term_number_{i:02}]")).collect();
        let lines = paginate(&terms);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|line| line.len() < LINE_WIDTH));
        assert!(lines[..lines.len() - 1].iter().all(|line| line.ends_with(',')));
        assert!(!lines[lines.len() - 1].ends_with(','));
        assert_eq!(lines.join(" ").split(", ").count(), terms.len());
    }

    #[test]
    fn render_groups_and_omits_hidden_members() {
        let shape = TypeShape {
            name: "Point".to_owned(),
            members: vec![
                Member::new(MemberKind::Field, "X").typed("int"),
                Member::new(MemberKind::Method, "get_X").typed("int").special(),
                Member::new(MemberKind::Method, "Move").typed("void").param("int", "dx").param("int", "dy"),
                Member::new(MemberKind::Constructor, ".ctor").special(),
                Member::new(MemberKind::Other("Event".to_owned()), "Moved"),
            ],
        };
        assert_eq!(
            render_type_shape(&shape).unwrap(),
            "Point {\n  Fields: [int X]\n  Constructors: [.ctor()]\n  Methods: [void Move(int dx, int dy)]\n  Other: [Event Moved]\n}"
        );
    }

    #[test]
    fn render_is_none_when_nothing_is_visible() {
        let shape = TypeShape {
            name: "Hidden".to_owned(),
            members: vec![Member::new(MemberKind::Property, "Item").special()],
        };
        assert_eq!(render_type_shape(&shape), None);
    }
}
