//! Identifier construction for coalescing and cache lookups.

use super::statement::Statement;

/// Build the canonical identifier of a read statement.
///
/// Format: `{table}:{sql}`, followed by `:` and the JSON rendering of each
/// bound value (comma separated) when any value is bound. JSON rendering keeps
/// `1` and `"1"` apart.
///
/// Inside every component `\`, `:` and `,` are backslash-escaped, so only the
/// separators themselves appear bare and distinct statements never share an
/// identifier.
pub fn build(statement: &Statement) -> String {
    let table = statement.table();
    let sql = statement.query_text();
    let mut identifier = String::with_capacity(table.len() + sql.len() + 1);
    push_escaped(&mut identifier, table);
    identifier.push(':');
    push_escaped(&mut identifier, sql);

    let mut separator = ':';
    for param in statement.params() {
        identifier.push(separator);
        push_escaped(&mut identifier, &param.to_string());
        separator = ',';
    }

    identifier
}

fn push_escaped(identifier: &mut String, component: &str) {
    for ch in component.chars() {
        if matches!(ch, '\\' | ':' | ',') {
            identifier.push('\\');
        }
        identifier.push(ch);
    }
}
