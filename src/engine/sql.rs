//! Reference [`QueryCompiler`]: a tokenizer and resolver for a SELECT subset.
//!
//! Supported: `*`, `alias.*`, column references with up to three parts,
//! literals, output aliases with or without `AS`, comma joins,
//! `[INNER] JOIN ... ON`, and `WHERE` conjunctions of comparisons. Column
//! to column comparisons must be equalities; they become join conditions.

use std::sync::Arc;

use super::{ColumnRef, CompileContext, Condition, ExprKind, OutputExpr, Plan, Prepared, QueryCompiler, RowSource};
use crate::catalog::{Entity, EntityId};
use crate::error::{MatViewError, MatViewResult};
use crate::schema::parser::parse_literal;
use crate::schema::{Column, CompareOp, DataType, Row, Value};

const RESERVED: &[&str] = &["SELECT", "FROM", "WHERE", "JOIN", "INNER", "ON", "AND", "AS"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Number(String),
    Text(String),
    Symbol(&'static str),
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn tokenize(sql: &str) -> MatViewResult<Vec<Token>> {
    let invalid = |reason: &str| MatViewError::InvalidSelectStatement {
        sql: sql.to_string(),
        reason: reason.to_string(),
    };

    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                        None => return Err(invalid("Unterminated string literal")),
                    }
                }
                tokens.push(Token::Text(text));
            }
            '"' => {
                let mut ident = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            ident.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            ident.push(*ch);
                            i += 1;
                        }
                        None => return Err(invalid("Unterminated quoted identifier")),
                    }
                }
                tokens.push(Token::Quoted(ident));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let symbol = match two.as_str() {
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    "<>" => Some("<>"),
                    "!=" => Some("!="),
                    _ => None,
                };
                if let Some(symbol) = symbol {
                    tokens.push(Token::Symbol(symbol));
                    i += 2;
                    continue;
                }
                let symbol = match c {
                    ',' => ",",
                    '.' => ".",
                    '*' => "*",
                    '(' => "(",
                    ')' => ")",
                    '=' => "=",
                    '<' => "<",
                    '>' => ">",
                    '-' => "-",
                    ';' => ";",
                    _ => return Err(invalid(&format!("Unexpected character '{}'", c))),
                };
                tokens.push(Token::Symbol(symbol));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum SelectItem {
    Star,
    QualifiedStar(Vec<String>),
    Column { parts: Vec<String>, alias: Option<String> },
    Literal { value: Value, text: String, alias: Option<String> },
}

#[derive(Debug, Clone)]
struct TableRef {
    parts: Vec<String>,
    alias: Option<String>,
}

#[derive(Debug, Clone)]
enum Operand {
    Column(Vec<String>),
    Literal(Value),
}

#[derive(Debug, Clone)]
struct Predicate {
    left: Operand,
    op: CompareOp,
    right: Operand,
}

#[derive(Debug)]
struct SelectStatement {
    items: Vec<SelectItem>,
    from: Vec<TableRef>,
    predicates: Vec<Predicate>,
}

struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str, tokens: Vec<Token>) -> Self {
        Self { sql, tokens, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> MatViewError {
        MatViewError::InvalidSelectStatement {
            sql: self.sql.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn accept_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> MatViewResult<()> {
        if self.accept_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("Expected {}", keyword)))
        }
    }

    fn accept_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn identifier(&mut self) -> MatViewResult<String> {
        match self.next() {
            Some(Token::Word(w)) if !RESERVED.iter().any(|r| w.eq_ignore_ascii_case(r)) => Ok(w),
            Some(Token::Quoted(q)) => Ok(q),
            other => Err(self.error(format!("Expected identifier, found {:?}", other))),
        }
    }

    /// `a`, `a.b` or `a.b.c`; stops before `.*`
    fn dotted_name(&mut self) -> MatViewResult<Vec<String>> {
        let mut parts = vec![self.identifier()?];
        while matches!(self.peek(), Some(Token::Symbol("."))) && !matches!(self.peek_at(1), Some(Token::Symbol("*"))) {
            self.pos += 1;
            parts.push(self.identifier()?);
        }
        if parts.len() > 3 {
            return Err(self.error(format!("Too many name parts in {}", parts.join("."))));
        }
        Ok(parts)
    }

    fn alias(&mut self) -> MatViewResult<Option<String>> {
        if self.accept_keyword("AS") {
            return self.identifier().map(Some);
        }
        match self.peek() {
            Some(Token::Word(w)) if !RESERVED.iter().any(|r| w.eq_ignore_ascii_case(r)) => self.identifier().map(Some),
            Some(Token::Quoted(_)) => self.identifier().map(Some),
            _ => Ok(None),
        }
    }

    fn literal(&mut self) -> MatViewResult<Option<(Value, String)>> {
        let negative = matches!(self.peek(), Some(Token::Symbol("-")))
            && matches!(self.peek_at(1), Some(Token::Number(_)));
        if negative {
            self.pos += 1;
        }

        let text = match self.peek() {
            Some(Token::Number(n)) => n.clone(),
            Some(Token::Text(t)) => format!("'{}'", t.replace('\'', "''")),
            Some(Token::Word(w)) if ["NULL", "TRUE", "FALSE"].iter().any(|k| w.eq_ignore_ascii_case(k)) => {
                w.to_ascii_uppercase()
            }
            _ => return Ok(None),
        };
        self.pos += 1;

        let text = if negative { format!("-{}", text) } else { text };
        match parse_literal(&text) {
            Some(value) => Ok(Some((value, text))),
            None => Err(self.error(format!("Malformed literal {}", text))),
        }
    }

    fn select_item(&mut self) -> MatViewResult<SelectItem> {
        if self.accept_symbol("*") {
            return Ok(SelectItem::Star);
        }
        if let Some((value, text)) = self.literal()? {
            let alias = self.alias()?;
            return Ok(SelectItem::Literal { value, text, alias });
        }

        let parts = self.dotted_name()?;
        if self.accept_symbol(".") {
            if !self.accept_symbol("*") {
                return Err(self.error("Expected * after qualifier"));
            }
            return Ok(SelectItem::QualifiedStar(parts));
        }
        let alias = self.alias()?;
        Ok(SelectItem::Column { parts, alias })
    }

    fn table_ref(&mut self) -> MatViewResult<TableRef> {
        let parts = self.dotted_name()?;
        if parts.len() > 2 {
            return Err(self.error(format!("Invalid table name {}", parts.join("."))));
        }
        let alias = self.alias()?;
        Ok(TableRef { parts, alias })
    }

    fn operand(&mut self) -> MatViewResult<Operand> {
        if let Some((value, _)) = self.literal()? {
            return Ok(Operand::Literal(value));
        }
        self.dotted_name().map(Operand::Column)
    }

    fn predicate(&mut self) -> MatViewResult<Predicate> {
        let left = self.operand()?;
        let op = match self.next() {
            Some(Token::Symbol(s)) => CompareOp::parse(s),
            _ => None,
        }
        .ok_or_else(|| self.error("Expected comparison operator"))?;
        let right = self.operand()?;
        Ok(Predicate { left, op, right })
    }

    fn conjunction(&mut self, into: &mut Vec<Predicate>) -> MatViewResult<()> {
        into.push(self.predicate()?);
        while self.accept_keyword("AND") {
            into.push(self.predicate()?);
        }
        Ok(())
    }

    fn select(&mut self) -> MatViewResult<SelectStatement> {
        self.expect_keyword("SELECT")?;

        let mut items = vec![self.select_item()?];
        while self.accept_symbol(",") {
            items.push(self.select_item()?);
        }

        self.expect_keyword("FROM")?;
        let mut from = vec![self.table_ref()?];
        let mut predicates = Vec::new();
        loop {
            if self.accept_symbol(",") {
                from.push(self.table_ref()?);
            } else if self.accept_keyword("INNER") {
                self.expect_keyword("JOIN")?;
                from.push(self.table_ref()?);
                self.expect_keyword("ON")?;
                self.conjunction(&mut predicates)?;
            } else if self.accept_keyword("JOIN") {
                from.push(self.table_ref()?);
                self.expect_keyword("ON")?;
                self.conjunction(&mut predicates)?;
            } else {
                break;
            }
        }

        if self.accept_keyword("WHERE") {
            self.conjunction(&mut predicates)?;
        }
        self.accept_symbol(";");

        if let Some(token) = self.peek() {
            return Err(self.error(format!("Unexpected {:?}", token)));
        }
        Ok(SelectStatement { items, from, predicates })
    }
}

/// A source of the FROM clause after name resolution
#[derive(Debug)]
struct Binding {
    id: EntityId,
    schema: String,
    name: String,
    alias: Option<String>,
    columns: Vec<Column>,
}

impl Binding {
    fn qualifier(&self) -> String {
        match &self.alias {
            Some(alias) => quote_identifier(alias),
            None => format!("{}.{}", quote_identifier(&self.schema), quote_identifier(&self.name)),
        }
    }

    fn answers_to(&self, qualifier: &[String]) -> bool {
        match qualifier {
            [q] => match &self.alias {
                Some(alias) => alias.eq_ignore_ascii_case(q),
                None => self.name.eq_ignore_ascii_case(q),
            },
            [s, t] => self.alias.is_none() && self.schema.eq_ignore_ascii_case(s) && self.name.eq_ignore_ascii_case(t),
            _ => false,
        }
    }
}

/// Double-quote identifiers that would not survive re-parsing bare
pub fn quote_identifier(name: &str) -> String {
    let simple = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.iter().any(|r| name.eq_ignore_ascii_case(r));
    if simple {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

struct Resolver<'c, 'a> {
    sql: &'a str,
    ctx: &'a CompileContext<'c>,
    bindings: Vec<Binding>,
}

impl Resolver<'_, '_> {
    fn bind(&mut self, table: &TableRef) -> MatViewResult<()> {
        let (schema, name) = match table.parts.as_slice() {
            [name] => (self.ctx.default_schema.to_string(), name.clone()),
            [schema, name] => (schema.clone(), name.clone()),
            _ => return Err(MatViewError::ObjectNotFound { name: table.parts.join(".") }),
        };

        let entity = self
            .ctx
            .catalog
            .lookup(&format!("{}.{}", schema, name))
            .ok_or_else(|| MatViewError::ObjectNotFound { name: table.parts.join(".") })?;

        let (id, schema, name, columns) = match entity {
            Entity::Table(t) => (t.id, t.schema.clone(), t.name(), t.columns.clone()),
            Entity::View(v) => {
                if let Some(error) = v.error() {
                    return Err(MatViewError::ViewInvalid {
                        view: v.qualified_name(),
                        reason: error.to_string(),
                    });
                }
                (v.id(), v.schema().to_string(), v.name().to_string(), v.columns())
            }
        };

        self.bindings.push(Binding {
            id,
            schema,
            name,
            alias: table.alias.clone(),
            columns,
        });
        Ok(())
    }

    fn column(&self, parts: &[String]) -> MatViewResult<ColumnRef> {
        let (qualifier, column) = match parts.split_last() {
            Some((column, qualifier)) => (qualifier, column),
            None => return Err(self.invalid("Empty column reference")),
        };

        let mut found = None;
        for (source, binding) in self.bindings.iter().enumerate() {
            if !qualifier.is_empty() && !binding.answers_to(qualifier) {
                continue;
            }
            if let Some(index) = binding.columns.iter().position(|c| c.name.eq_ignore_ascii_case(column)) {
                if found.is_some() {
                    return Err(self.invalid(format!("Ambiguous column reference {}", parts.join("."))));
                }
                found = Some(ColumnRef { source, column: index });
            }
        }

        found.ok_or_else(|| MatViewError::ColumnNotFound {
            column: parts.join("."),
            context: self.from_clause(),
        })
    }

    fn from_clause(&self) -> String {
        let names: Vec<String> = self.bindings.iter().map(Binding::qualifier).collect();
        format!("FROM {}", names.join(", "))
    }

    fn invalid(&self, reason: impl Into<String>) -> MatViewError {
        MatViewError::InvalidSelectStatement {
            sql: self.sql.to_string(),
            reason: reason.into(),
        }
    }

    fn render_column(&self, r: &ColumnRef) -> String {
        match self.bindings.get(r.source) {
            Some(b) => {
                let name = b.columns.get(r.column).map_or("?", |c| c.name.as_str());
                format!("{}.{}", b.qualifier(), quote_identifier(name))
            }
            None => "?".to_string(),
        }
    }

    fn column_expr(&self, r: ColumnRef, alias: Option<String>, sql: String) -> OutputExpr {
        let column = self.bindings.get(r.source).and_then(|b| b.columns.get(r.column));
        OutputExpr {
            alias: alias.or_else(|| column.map(|c| c.name.clone())),
            sql,
            data_type: column.map_or(DataType::Unknown, |c| c.data_type),
            kind: ExprKind::Column(r),
        }
    }

    fn condition(&self, predicate: &Predicate) -> MatViewResult<Condition> {
        match (&predicate.left, &predicate.right) {
            (Operand::Column(l), Operand::Column(r)) => {
                if predicate.op != CompareOp::Eq {
                    return Err(self.invalid("Only equality comparisons are supported between columns"));
                }
                Ok(Condition::Join {
                    left: self.column(l)?,
                    right: self.column(r)?,
                })
            }
            (Operand::Column(c), Operand::Literal(v)) => Ok(Condition::Compare {
                column: self.column(c)?,
                op: predicate.op,
                value: v.clone(),
            }),
            (Operand::Literal(v), Operand::Column(c)) => Ok(Condition::Compare {
                column: self.column(c)?,
                op: flipped(predicate.op),
                value: v.clone(),
            }),
            (Operand::Literal(_), Operand::Literal(_)) => {
                Err(self.invalid("A comparison must reference at least one column"))
            }
        }
    }
}

fn flipped(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::LtEq => CompareOp::GtEq,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::GtEq => CompareOp::LtEq,
        other => other,
    }
}

/// Compiled SELECT: bound sources, typed conditions, output expressions
#[derive(Debug)]
pub struct SelectPlan {
    expressions: Vec<OutputExpr>,
    sources: Vec<EntityId>,
    conditions: Vec<Condition>,
    sql: String,
}

impl Plan for SelectPlan {
    fn expressions(&self) -> &[OutputExpr] {
        &self.expressions
    }

    fn sources(&self) -> &[EntityId] {
        &self.sources
    }

    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn plan_sql(&self) -> &str {
        &self.sql
    }

    fn execute(&self, rows: &dyn RowSource) -> MatViewResult<Vec<Row>> {
        let inputs = self
            .sources
            .iter()
            .map(|s| rows.scan_entity(*s))
            .collect::<MatViewResult<Vec<_>>>()?;
        let projection: Vec<ExprKind> = self.expressions.iter().map(|e| e.kind.clone()).collect();
        Ok(super::evaluate(&inputs, &self.conditions, &projection))
    }
}

#[derive(Debug, Default)]
pub struct SqlCompiler;

impl SqlCompiler {
    pub fn new() -> Self {
        Self
    }

    fn compile_select(&self, sql: &str, tokens: Vec<Token>, ctx: &CompileContext<'_>) -> MatViewResult<SelectPlan> {
        let statement = Parser::new(sql, tokens).select()?;

        let mut resolver = Resolver {
            sql,
            ctx,
            bindings: Vec::with_capacity(statement.from.len()),
        };
        for table in &statement.from {
            resolver.bind(table)?;
        }

        let mut expressions = Vec::new();
        let mut rendered = Vec::new();
        for item in &statement.items {
            match item {
                SelectItem::Star => {
                    for (source, binding) in resolver.bindings.iter().enumerate() {
                        for column in 0..binding.columns.len() {
                            let r = ColumnRef { source, column };
                            let text = resolver.render_column(&r);
                            expressions.push(resolver.column_expr(r, None, text.clone()));
                            rendered.push(text);
                        }
                    }
                }
                SelectItem::QualifiedStar(qualifier) => {
                    let source = resolver
                        .bindings
                        .iter()
                        .position(|b| b.answers_to(qualifier))
                        .ok_or_else(|| MatViewError::ObjectNotFound { name: qualifier.join(".") })?;
                    for column in 0..resolver.bindings[source].columns.len() {
                        let r = ColumnRef { source, column };
                        let text = resolver.render_column(&r);
                        expressions.push(resolver.column_expr(r, None, text.clone()));
                        rendered.push(text);
                    }
                }
                SelectItem::Column { parts, alias } => {
                    let r = resolver.column(parts)?;
                    let mut text = resolver.render_column(&r);
                    if let Some(alias) = alias {
                        text = format!("{} AS {}", text, quote_identifier(alias));
                    }
                    expressions.push(resolver.column_expr(r, alias.clone(), parts.join(".")));
                    rendered.push(text);
                }
                SelectItem::Literal { value, text, alias } => {
                    let mut out = value.to_sql_literal();
                    if let Some(alias) = alias {
                        out = format!("{} AS {}", out, quote_identifier(alias));
                    }
                    expressions.push(OutputExpr {
                        alias: alias.clone(),
                        sql: text.clone(),
                        data_type: value.data_type(),
                        kind: ExprKind::Literal(value.clone()),
                    });
                    rendered.push(out);
                }
            }
        }

        let conditions = statement
            .predicates
            .iter()
            .map(|p| resolver.condition(p))
            .collect::<MatViewResult<Vec<_>>>()?;

        let from: Vec<String> = resolver
            .bindings
            .iter()
            .map(|b| {
                let table = format!("{}.{}", quote_identifier(&b.schema), quote_identifier(&b.name));
                match &b.alias {
                    Some(alias) => format!("{} {}", table, quote_identifier(alias)),
                    None => table,
                }
            })
            .collect();

        let mut canonical = format!("SELECT {} FROM {}", rendered.join(", "), from.join(", "));
        if !conditions.is_empty() {
            let predicates: Vec<String> = conditions
                .iter()
                .map(|c| match c {
                    Condition::Join { left, right } => {
                        format!("{} = {}", resolver.render_column(left), resolver.render_column(right))
                    }
                    Condition::Compare { column, op, value } => {
                        format!("{} {} {}", resolver.render_column(column), op, value.to_sql_literal())
                    }
                })
                .collect();
            canonical.push_str(" WHERE ");
            canonical.push_str(&predicates.join(" AND "));
        }

        Ok(SelectPlan {
            expressions,
            sources: resolver.bindings.iter().map(|b| b.id).collect(),
            conditions,
            sql: canonical,
        })
    }
}

impl QueryCompiler for SqlCompiler {
    fn prepare(&self, sql: &str, ctx: &CompileContext<'_>) -> MatViewResult<Prepared> {
        let tokens = tokenize(sql)?;
        match tokens.first() {
            None => Err(MatViewError::InvalidSelectStatement {
                sql: sql.to_string(),
                reason: "Empty statement".to_string(),
            }),
            Some(first) if first.is_keyword("SELECT") => {
                let plan = self.compile_select(sql, tokens, ctx)?;
                Ok(Prepared::Query(Arc::new(plan)))
            }
            Some(Token::Word(word)) => Ok(Prepared::Command {
                kind: word.to_ascii_uppercase(),
            }),
            Some(other) => Err(MatViewError::InvalidSelectStatement {
                sql: sql.to_string(),
                reason: format!("Unexpected {:?}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TableEntry};
    use crate::error::testing::assert_error_sqlstate;
    use crate::row;
    use crate::schema::DataType;
    use std::collections::HashMap;

    fn catalog() -> Catalog {
        let catalog = Catalog::new("public");
        for (name, columns) in [
            ("table1", vec![Column::new("value", DataType::Integer), Column::new("name", DataType::Varchar)]),
            ("table2", vec![Column::new("value", DataType::Integer), Column::new("location", DataType::Varchar)]),
        ] {
            let id = catalog.allocate_id();
            catalog.register_table(TableEntry::new(id, "public", name, columns)).unwrap();
        }
        catalog
    }

    fn prepare(catalog: &Catalog, sql: &str) -> MatViewResult<Arc<dyn Plan>> {
        let ctx = CompileContext {
            catalog,
            default_schema: "public",
        };
        match SqlCompiler::new().prepare(sql, &ctx)? {
            Prepared::Query(plan) => Ok(plan),
            Prepared::Command { kind } => panic!("unexpected command {}", kind),
        }
    }

    struct Rows(HashMap<EntityId, Vec<Row>>);

    impl RowSource for Rows {
        fn scan_entity(&self, entity: EntityId) -> MatViewResult<Vec<Row>> {
            Ok(self.0.get(&entity).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn test_star_and_canonical_text() {
        let catalog = catalog();
        let plan = prepare(&catalog, "select * from table1").unwrap();

        assert_eq!(plan.expressions().len(), 2);
        assert_eq!(plan.expressions()[1].alias.as_deref(), Some("name"));
        assert_eq!(plan.plan_sql(), "SELECT public.table1.value, public.table1.name FROM public.table1");
    }

    #[test]
    fn test_join_forms_are_equivalent() {
        let catalog = catalog();
        let comma = prepare(&catalog, "SELECT a.name, b.location FROM table1 a, table2 b WHERE a.value = b.value").unwrap();
        let join = prepare(&catalog, "SELECT a.name, b.location FROM table1 AS a INNER JOIN table2 b ON a.value = b.value")
            .unwrap();

        assert_eq!(comma.plan_sql(), join.plan_sql());
        assert_eq!(
            comma.conditions(),
            &[Condition::Join {
                left: ColumnRef { source: 0, column: 0 },
                right: ColumnRef { source: 1, column: 0 },
            }]
        );
    }

    #[test]
    fn test_execute_with_filter() {
        let catalog = catalog();
        let plan = prepare(&catalog, "SELECT name, 'x' tag FROM table1 WHERE 2 <= value").unwrap();
        let t1 = catalog.lookup_id("table1").unwrap();

        assert_eq!(
            plan.conditions(),
            &[Condition::Compare {
                column: ColumnRef { source: 0, column: 0 },
                op: CompareOp::GtEq,
                value: Value::Integer(2),
            }]
        );

        let rows = Rows(HashMap::from([(t1, vec![row![1, "Hello"], row![2, "World"], row![3, "!!!"]])]));
        let result = plan.execute(&rows).unwrap();
        assert_eq!(result, vec![row!["World", "x"], row!["!!!", "x"]]);
    }

    #[test]
    fn test_canonical_text_recompiles_identically() {
        let catalog = catalog();
        let plan = prepare(&catalog, "SELECT t.value AS \"Key Value\", -5 FROM table1 t WHERE t.name <> 'it''s'").unwrap();
        let again = prepare(&catalog, plan.plan_sql()).unwrap();
        assert_eq!(plan.plan_sql(), again.plan_sql());
        assert_eq!(again.expressions()[0].alias.as_deref(), Some("Key Value"));
        assert_eq!(again.expressions()[1].kind, ExprKind::Literal(Value::Integer(-5)));
    }

    #[test]
    fn test_resolution_errors() {
        let catalog = catalog();
        assert_error_sqlstate(prepare(&catalog, "SELECT * FROM missing"), "42P01");
        assert_error_sqlstate(prepare(&catalog, "SELECT nope FROM table1"), "42703");
        assert_error_sqlstate(prepare(&catalog, "SELECT value FROM table1, table2"), "42601");
        assert_error_sqlstate(prepare(&catalog, "SELECT name FROM table1 WHERE"), "42601");
        assert_error_sqlstate(prepare(&catalog, "SELECT a.name FROM table1 a, table2 b WHERE a.value < b.value"), "42601");
    }

    #[test]
    fn test_commands_are_not_queries() {
        let catalog = catalog();
        let ctx = CompileContext {
            catalog: &catalog,
            default_schema: "public",
        };
        match SqlCompiler::new().prepare("delete from table1", &ctx).unwrap() {
            Prepared::Command { kind } => assert_eq!(kind, "DELETE"),
            Prepared::Query(_) => panic!("DELETE compiled as a query"),
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("name"), "name");
        assert_eq!(quote_identifier("Key Value"), "\"Key Value\"");
        assert_eq!(quote_identifier("select"), "\"select\"");
    }
}
