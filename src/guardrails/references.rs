//! Relation extraction.
//!
//! Walks the token stream and collects every name in table position: after
//! `FROM`, `JOIN`, `INTO`, `OVERWRITE`, `UPDATE`, `TABLE`, `USING`, `VIEW`,
//! `RENAME TO`, after commas in a `FROM` list, and at the start of a
//! parenthesized relation. A literal or stray symbol in table position is
//! reported as unresolved rather than skipped. Parentheses are
//! tracked as frames so `EXTRACT(YEAR FROM ts)` is not mistaken for a relation
//! and a subquery's `FROM` list does not leak into the enclosing one.
//!
//! Known limitation: names built at runtime (string concatenation, dynamic
//! SQL) are invisible here. Table-valued functions in table position are
//! reported as unresolved for that reason.

use crate::guardrails::lexer::Token;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully-qualified `catalog.schema.table` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl Reference {
    pub fn new(catalog: &str, schema: &str, table: &str) -> Self {
        Self {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

/// A name found in table position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Qualified(Reference),
    /// Bare, two-part, over-qualified, or a table-valued function.
    Unresolved(String),
}

const RELATION_KEYWORDS: &[&str] = &[
    "FROM", "JOIN", "INTO", "OVERWRITE", "UPDATE", "TABLE", "USING", "VIEW",
];

/// Keywords that end a `FROM` list at the same nesting level.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "UNION", "INTERSECT", "EXCEPT", "MINUS",
    "QUALIFY", "WINDOW", "SELECT", "SET", "CLUSTER", "DISTRIBUTE", "SORT", "OFFSET", "FETCH",
];

/// Words that never start a relation name and never name a function call.
const RESERVED: &[&str] = &[
    "ALL", "AND", "ANTI", "ANY", "AS", "BETWEEN", "BY", "CASE", "CROSS", "DISTINCT", "ELSE",
    "END", "EXCEPT", "EXISTS", "FROM", "FULL", "GROUP", "HAVING", "IF", "IN", "INNER",
    "INTERSECT", "INTO", "IS", "JOIN", "LATERAL", "LEFT", "LIKE", "LIMIT", "MINUS", "NATURAL",
    "NOT", "NULL", "ON", "ONLY", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "QUALIFY",
    "RIGHT", "SELECT", "SEMI", "SET", "SOME", "TABLE", "THEN", "UNION", "USING", "VALUES",
    "WHEN", "WHERE", "WINDOW", "WITH",
];

/// Modifiers skipped between a relation keyword and the name.
const RELATION_MODIFIERS: &[&str] = &["IF", "NOT", "EXISTS", "ONLY", "LATERAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    Query,
    Call,
    Group,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    in_from_list: bool,
}

fn is_in(word: &str, set: &[&str]) -> bool {
    set.iter().any(|k| word.eq_ignore_ascii_case(k))
}

fn is_reserved(token: &Token<'_>) -> bool {
    matches!(token, Token::Word(w) if is_in(w, RESERVED))
}

/// `TO` opens a relation slot only in `RENAME TO`.
fn is_relation_slot(word: &str, prev: Option<&Token<'_>>) -> bool {
    is_in(word, RELATION_KEYWORDS)
        || (word.eq_ignore_ascii_case("TO") && prev.map_or(false, |t| t.is_keyword("RENAME")))
}

/// Collect relations in textual order.
pub fn extract_relations(tokens: &[Token<'_>]) -> Vec<Relation> {
    let mut relations = Vec::new();
    let mut frames = vec![Frame {
        kind: FrameKind::Root,
        in_from_list: false,
    }];
    // Set when a relation slot opened onto `(`; the next frame is a relation group.
    let mut relation_paren = false;
    // Tokens before this index belong to a relation name already read.
    let mut skip_to = 0;

    for (idx, token) in tokens.iter().enumerate() {
        if idx < skip_to {
            continue;
        }
        let prev = if idx > 0 { tokens.get(idx - 1) } else { None };
        let next = tokens.get(idx + 1);

        match token {
            Token::LParen => {
                let opens_query = next.map_or(false, |t| t.is_keyword("SELECT") || t.is_keyword("WITH"));
                let kind = if opens_query {
                    FrameKind::Query
                } else if relation_paren {
                    FrameKind::Group
                } else {
                    match prev {
                        Some(Token::Word(w)) if !is_in(w, RESERVED) => FrameKind::Call,
                        Some(Token::Quoted(_)) => FrameKind::Call,
                        _ => FrameKind::Group,
                    }
                };
                let relation_group = relation_paren && kind == FrameKind::Group;
                relation_paren = false;
                frames.push(Frame {
                    kind,
                    in_from_list: relation_group,
                });
                if relation_group {
                    (skip_to, relation_paren) = read_relation(tokens, idx + 1, &mut relations);
                }
            }
            Token::RParen => {
                if frames.len() > 1 {
                    frames.pop();
                }
            }
            Token::Comma => {
                let frame = frames.last().map(|f| f.in_from_list).unwrap_or(false);
                if frame {
                    (skip_to, relation_paren) = read_relation(tokens, idx + 1, &mut relations);
                }
            }
            Token::Word(word) => {
                if matches!(prev, Some(Token::Dot)) {
                    continue;
                }
                let frame = match frames.last_mut() {
                    Some(frame) => frame,
                    None => continue,
                };
                if is_in(word, CLAUSE_KEYWORDS) {
                    frame.in_from_list = false;
                }
                if !is_relation_slot(word, prev) || frame.kind == FrameKind::Call {
                    continue;
                }
                let upper = word.to_ascii_uppercase();
                if upper == "FROM" && prev.map_or(false, |t| t.is_keyword("DISTINCT")) {
                    continue;
                }
                if upper == "VIEW" && prev.map_or(false, |t| t.is_keyword("LATERAL")) {
                    continue;
                }
                if upper == "FROM" {
                    frame.in_from_list = true;
                }
                // `JOIN ... USING (col)` names columns, not relations.
                let (end, opens_paren) = read_relation(tokens, idx + 1, &mut relations);
                skip_to = end;
                relation_paren = opens_paren && upper != "USING";
            }
            _ => {}
        }
    }

    relations
}

/// Read one relation starting at `start`.
///
/// Returns the index just past the relation name, and whether the slot opens
/// onto a parenthesis so the caller can treat the next frame as a relation
/// group.
fn read_relation(tokens: &[Token<'_>], start: usize, out: &mut Vec<Relation>) -> (usize, bool) {
    let mut idx = start;
    let dotted = |i: usize| matches!(tokens.get(i + 1), Some(Token::Dot));
    while let Some(Token::Word(w)) = tokens.get(idx) {
        if is_in(w, RELATION_MODIFIERS) && !dotted(idx) {
            idx += 1;
        } else {
            break;
        }
    }

    // A reserved word followed by a dot is still a catalog name.
    match tokens.get(idx) {
        Some(Token::LParen) => return (idx, true),
        Some(token @ Token::Word(_)) if is_reserved(token) && !dotted(idx) => return (idx, false),
        Some(Token::Word(_)) | Some(Token::Quoted(_)) => {}
        Some(token) => {
            out.push(Relation::Unresolved(token.text()));
            return (idx + 1, false);
        }
        None => return (idx, false),
    }

    let mut parts = Vec::new();
    loop {
        match tokens.get(idx).and_then(|t| t.ident()) {
            Some(part) => parts.push(part),
            None => break,
        }
        idx += 1;
        let continues = matches!(tokens.get(idx), Some(Token::Dot))
            && matches!(tokens.get(idx + 1), Some(Token::Word(_)) | Some(Token::Quoted(_)));
        if !continues {
            break;
        }
        idx += 1;
    }

    // Three-part table functions stay qualified so their schema is still checked.
    if parts.len() == 3 {
        out.push(Relation::Qualified(Reference::new(&parts[0], &parts[1], &parts[2])));
    } else {
        out.push(Relation::Unresolved(parts.join(".")));
    }
    (idx, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::lexer::tokenize;

    fn relations(sql: &str) -> Vec<Relation> {
        extract_relations(&tokenize(sql))
    }

    fn q(c: &str, s: &str, t: &str) -> Relation {
        Relation::Qualified(Reference::new(c, s, t))
    }

    fn u(name: &str) -> Relation {
        Relation::Unresolved(name.to_string())
    }

    #[test]
    fn test_simple_three_part() {
        assert_eq!(relations("SELECT * FROM main.sales.orders"), vec![q("main", "sales", "orders")]);
    }

    #[test]
    fn test_backticks_and_whitespace_between_segments() {
        assert_eq!(
            relations("SELECT * FROM `main` .\n `sales`\n.`orders` o"),
            vec![q("main", "sales", "orders")]
        );
        assert_eq!(
            relations("SELECT * FROM `main`.sales.`order items`"),
            vec![q("main", "sales", "order items")]
        );
    }

    #[test]
    fn test_bare_and_two_part_unresolved() {
        assert_eq!(relations("SELECT * FROM orders"), vec![u("orders")]);
        assert_eq!(relations("SELECT * FROM sales.orders"), vec![u("sales.orders")]);
        assert_eq!(relations("SELECT * FROM a.b.c.d"), vec![u("a.b.c.d")]);
    }

    #[test]
    fn test_joins() {
        let sql = "SELECT c.id, COUNT(o.id) FROM `main`.`default`.`customers` c \
                   LEFT OUTER JOIN `main`.`sales`.`orders` o ON c.id = o.customer_id GROUP BY c.id";
        assert_eq!(
            relations(sql),
            vec![q("main", "default", "customers"), q("main", "sales", "orders")]
        );
    }

    #[test]
    fn test_comma_list() {
        assert_eq!(
            relations("SELECT * FROM main.a.x AS x, main.b.y y, secret.c.z WHERE x.id = y.id"),
            vec![q("main", "a", "x"), q("main", "b", "y"), q("secret", "c", "z")]
        );
    }

    #[test]
    fn test_comma_list_survives_join_condition() {
        assert_eq!(
            relations("SELECT * FROM main.a.x JOIN main.a.y ON x.id = y.id, secret.c.z"),
            vec![q("main", "a", "x"), q("main", "a", "y"), q("secret", "c", "z")]
        );
    }

    #[test]
    fn test_comma_list_after_subquery() {
        assert_eq!(
            relations("SELECT * FROM (SELECT id FROM main.a.x) s, secret.c.z"),
            vec![q("main", "a", "x"), q("secret", "c", "z")]
        );
    }

    #[test]
    fn test_select_list_commas_ignored() {
        assert_eq!(
            relations("SELECT a, b, c FROM main.a.x WHERE a IN (1, 2, 3)"),
            vec![q("main", "a", "x")]
        );
    }

    #[test]
    fn test_from_inside_function_call_ignored() {
        assert_eq!(
            relations("SELECT EXTRACT(YEAR FROM ts), TRIM(BOTH 'x' FROM name) FROM main.a.x"),
            vec![q("main", "a", "x")]
        );
        assert_eq!(
            relations("SELECT * FROM main.a.x WHERE a IS DISTINCT FROM b"),
            vec![q("main", "a", "x")]
        );
    }

    #[test]
    fn test_subqueries_everywhere() {
        let sql = "SELECT (SELECT max(v) FROM main.a.x) FROM main.a.y \
                   WHERE EXISTS (SELECT 1 FROM other.b.z) AND id IN (SELECT id FROM orders)";
        assert_eq!(
            relations(sql),
            vec![q("main", "a", "x"), q("main", "a", "y"), q("other", "b", "z"), u("orders")]
        );
    }

    #[test]
    fn test_parenthesized_relation_group() {
        assert_eq!(
            relations("SELECT * FROM (main.a.x JOIN secret.b.y ON x.id = y.id)"),
            vec![q("main", "a", "x"), q("secret", "b", "y")]
        );
    }

    #[test]
    fn test_table_valued_function_unresolved() {
        assert_eq!(relations("SELECT * FROM range(10)"), vec![u("range")]);
        assert_eq!(
            relations("SELECT * FROM IDENTIFIER('secret.x.y')"),
            vec![u("IDENTIFIER")]
        );
    }

    #[test]
    fn test_references_in_comments_and_strings_ignored() {
        assert_eq!(
            relations("SELECT 'FROM secret.x.y' FROM main.a.x -- JOIN secret.x.y\n"),
            vec![q("main", "a", "x")]
        );
    }

    #[test]
    fn test_dml_targets() {
        assert_eq!(relations("INSERT INTO main.a.x SELECT * FROM main.a.y"), vec![
            q("main", "a", "x"),
            q("main", "a", "y")
        ]);
        assert_eq!(relations("UPDATE main.a.x SET v = 1"), vec![q("main", "a", "x")]);
        assert_eq!(relations("DROP TABLE IF EXISTS main.a.x"), vec![q("main", "a", "x")]);
        assert_eq!(
            relations("MERGE INTO main.a.x t USING main.a.y s ON t.id = s.id"),
            vec![q("main", "a", "x"), q("main", "a", "y")]
        );
    }

    #[test]
    fn test_join_using_columns_not_relations() {
        assert_eq!(
            relations("SELECT * FROM main.a.x JOIN main.a.y USING (id, day)"),
            vec![q("main", "a", "x"), q("main", "a", "y")]
        );
    }

    #[test]
    fn test_reserved_word_catalog_still_extracted() {
        assert_eq!(relations("SELECT * FROM order.a.x"), vec![q("order", "a", "x")]);
        assert_eq!(
            relations("SELECT * FROM order.a.x, secret.b.y"),
            vec![q("order", "a", "x"), q("secret", "b", "y")]
        );
    }

    #[test]
    fn test_insert_column_list_keeps_target_qualified() {
        assert_eq!(
            relations("INSERT INTO main.a.x (id, v) VALUES (1, 2)"),
            vec![q("main", "a", "x")]
        );
    }

    #[test]
    fn test_keyword_as_column_name_is_not_a_relation() {
        assert_eq!(relations("SELECT t.table, t.from FROM main.a.x t"), vec![q("main", "a", "x")]);
    }

    #[test]
    fn test_digit_leading_names_are_read_whole() {
        assert_eq!(
            relations("SELECT * FROM 1secret.hr.salaries"),
            vec![q("1secret", "hr", "salaries")]
        );
        assert_eq!(
            relations("SELECT * FROM main.sales.orders o JOIN 2024archive.hr.salaries s ON o.id = s.id"),
            vec![q("main", "sales", "orders"), q("2024archive", "hr", "salaries")]
        );
        assert_eq!(relations("SELECT * FROM 2024orders"), vec![u("2024orders")]);
        assert_eq!(
            relations("SELECT * FROM main.sales.2024_orders"),
            vec![q("main", "sales", "2024_orders")]
        );
    }

    #[test]
    fn test_non_identifier_in_table_position_is_unresolved() {
        assert_eq!(relations("SELECT * FROM 123"), vec![u("123")]);
        assert_eq!(relations("SELECT * FROM 'secret.hr.salaries'"), vec![u("'secret.hr.salaries'")]);
        assert_eq!(relations("SELECT * FROM main.a.x, @stage"), vec![q("main", "a", "x"), u("@")]);
        assert_eq!(relations("SELECT * FROM main.sales.42"), vec![u("main.sales")]);
    }

    #[test]
    fn test_overwrite_and_rename_targets() {
        assert_eq!(
            relations("INSERT OVERWRITE secret.hr.salaries SELECT * FROM main.a.x"),
            vec![q("secret", "hr", "salaries"), q("main", "a", "x")]
        );
        assert_eq!(
            relations("INSERT OVERWRITE TABLE secret.hr.salaries SELECT * FROM main.a.x"),
            vec![q("secret", "hr", "salaries"), q("main", "a", "x")]
        );
        assert_eq!(
            relations("ALTER TABLE main.a.x RENAME TO secret.hr.x"),
            vec![q("main", "a", "x"), q("secret", "hr", "x")]
        );
        assert_eq!(
            relations("ALTER TABLE main.a.x RENAME COLUMN old_name TO new_name"),
            vec![q("main", "a", "x")]
        );
    }

    #[test]
    fn test_lateral_view_is_not_a_relation() {
        assert_eq!(
            relations("SELECT id, item FROM main.a.x LATERAL VIEW explode(items) t AS item"),
            vec![q("main", "a", "x")]
        );
    }
}
