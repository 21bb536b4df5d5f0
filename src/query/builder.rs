use super::{Field, NativeQuery, Value};

/// Alias used for the scanned table in every generated statement
pub const TABLE_ALIAS: &str = "t";
/// Name of the JSONB column projected by generated `SELECT`/`RETURNING` clauses
pub const RECORD_COLUMN: &str = "record";

/// Quotes an identifier for PostgreSQL, doubling any embedded quote.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub struct CompiledClause {
    pub clause: String,
    pub values: Vec<Value>,
}

impl CompiledClause {
    pub fn new(clause: String, values: Vec<Value>) -> Self {
        Self { clause, values }
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.clause, self.values)
    }
}

#[derive(Debug)]
pub struct CompilerResult {
    pub clauses: Vec<String>,
    pub values: Vec<Value>,
}

impl CompilerResult {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Accumulates equality clauses, numbering placeholders as they are added.
///
/// Each clause compares the JSONB projection of a column against a JSONB
/// parameter, so values bind uniformly regardless of the column type.
pub struct ClausesCompiler {
    result: CompilerResult,
    /// Number of placeholders already used by the enclosing statement
    offset: usize,
}

impl Default for ClausesCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ClausesCompiler {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    pub fn with_offset(offset: usize) -> Self {
        Self {
            result: CompilerResult::new(),
            offset,
        }
    }

    fn next_placeholder(&self) -> usize {
        self.offset + self.result.values.len() + 1
    }

    pub fn equals(mut self, field: &Field, value: Value) -> Self {
        let clause = CompiledClause::new(
            format!(
                "(to_jsonb({TABLE_ALIAS}) -> '{}') = ${}::jsonb",
                field.name(),
                self.next_placeholder()
            ),
            vec![value],
        );

        let (clause, mut values) = clause.into_parts();
        self.result.clauses.push(clause);
        self.result.values.append(&mut values);

        self
    }

    pub fn compile(self) -> CompilerResult {
        self.result
    }
}

/// A rendered statement with its positional parameters.
#[derive(Debug)]
pub struct CompiledQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

/// Renders a [`NativeQuery`] as a parameterised `SELECT`, each row projected
/// as a single JSONB column named [`RECORD_COLUMN`].
pub fn compile_select(query: &NativeQuery) -> CompiledQuery {
    let mut compiler = ClausesCompiler::new();
    for p in &query.predicates {
        compiler = compiler.equals(&p.field, p.value.clone());
    }
    let result = compiler.compile();

    let mut sql = format!(
        "SELECT to_jsonb({TABLE_ALIAS}) AS {RECORD_COLUMN} FROM {} AS {TABLE_ALIAS}",
        quote_ident(&query.collection)
    );

    if !result.is_unfiltered() {
        sql.push_str(" WHERE ");
        sql.push_str(&result.clauses.join(" AND "));
    }

    sql.push_str(&format!(
        " ORDER BY {TABLE_ALIAS}.{} {}",
        quote_ident(query.order.field.name()),
        if query.order.descending { "DESC" } else { "ASC" }
    ));

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    CompiledQuery {
        sql,
        values: result.values,
    }
}
