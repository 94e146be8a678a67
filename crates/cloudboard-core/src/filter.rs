use std::fmt;

use serde::{
  Deserialize,
  Serialize
};
use thiserror::Error;
use tracing::{
  trace,
  warn
};

/// Value reported for a field the row does
/// not have data for.
pub const NOT_AVAILABLE: &str = "N/A";

/// Deepest parenthesis nesting the
/// evaluator descends into.
pub const MAX_NESTING: usize = 128;

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
  Contains,
  Equals,
  StartsWith,
  EndsWith,
  IsEmpty,
  IsNotEmpty
}

impl Operator {
  pub const ALL: [Operator; 6] = [
    Operator::Contains,
    Operator::Equals,
    Operator::StartsWith,
    Operator::EndsWith,
    Operator::IsEmpty,
    Operator::IsNotEmpty
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | Operator::Contains => "contains",
      | Operator::Equals => "equals",
      | Operator::StartsWith => {
        "startsWith"
      }
      | Operator::EndsWith => "endsWith",
      | Operator::IsEmpty => "isEmpty",
      | Operator::IsNotEmpty => {
        "isNotEmpty"
      }
    }
  }

  pub fn parse(
    text: &str
  ) -> Option<Self> {
    Operator::ALL.into_iter().find(
      |op| {
        op.as_str()
          .eq_ignore_ascii_case(
            text.trim()
          )
      }
    )
  }

  pub fn takes_value(self) -> bool {
    !matches!(
      self,
      Operator::IsEmpty
        | Operator::IsNotEmpty
    )
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct FilterTerm {
  pub field:    String,
  pub operator: Operator,
  #[serde(default)]
  pub value:    String
}

impl FilterTerm {
  pub fn new(
    field: impl Into<String>,
    operator: Operator,
    value: impl Into<String>
  ) -> Self {
    Self {
      field: field.into(),
      operator,
      value: value.into()
    }
  }

  /// Compares an already extracted field
  /// value. Text comparisons ignore case.
  pub fn test(
    &self,
    actual: &str
  ) -> bool {
    let actual =
      actual.to_lowercase();
    let expected =
      self.value.to_lowercase();

    match self.operator {
      | Operator::Contains => {
        actual.contains(&expected)
      }
      | Operator::Equals => {
        actual == expected
      }
      | Operator::StartsWith => {
        actual.starts_with(&expected)
      }
      | Operator::EndsWith => {
        actual.ends_with(&expected)
      }
      | Operator::IsEmpty => {
        is_blank(&actual)
      }
      | Operator::IsNotEmpty => {
        !is_blank(&actual)
      }
    }
  }
}

fn is_blank(value: &str) -> bool {
  let trimmed = value.trim();
  trimmed.is_empty()
    || trimmed.eq_ignore_ascii_case(
      NOT_AVAILABLE
    )
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connective {
  And,
  Or
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub enum Paren {
  #[serde(rename = "(")]
  Open,
  #[serde(rename = ")")]
  Close
}

/// One token of the builder-produced
/// stream. Stored as JSON objects tagged
/// by `type`.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(
  tag = "type",
  rename_all = "lowercase"
)]
pub enum FilterElement {
  Filter(FilterTerm),
  Operator {
    value: Connective
  },
  Parenthesis {
    value: Paren
  }
}

impl FilterElement {
  pub fn and() -> Self {
    FilterElement::Operator {
      value: Connective::And
    }
  }

  pub fn or() -> Self {
    FilterElement::Operator {
      value: Connective::Or
    }
  }

  pub fn open() -> Self {
    FilterElement::Parenthesis {
      value: Paren::Open
    }
  }

  pub fn close() -> Self {
    FilterElement::Parenthesis {
      value: Paren::Close
    }
  }
}

impl fmt::Display for FilterElement {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | FilterElement::Filter(term) => {
        if term.operator.takes_value()
        {
          write!(
            f,
            "{} {} \"{}\"",
            term.field,
            term.operator.as_str(),
            term.value
          )
        } else {
          write!(
            f,
            "{} {}",
            term.field,
            term.operator.as_str()
          )
        }
      }
      | FilterElement::Operator {
        value: Connective::And
      } => f.write_str("AND"),
      | FilterElement::Operator {
        value: Connective::Or
      } => f.write_str("OR"),
      | FilterElement::Parenthesis {
        value: Paren::Open
      } => f.write_str("("),
      | FilterElement::Parenthesis {
        value: Paren::Close
      } => f.write_str(")")
    }
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Error,
)]
pub enum FilterError {
  #[error("unknown filter field: {0}")]
  UnknownField(String),
  #[error(
    "expected a filter or '(' at \
     position {0}"
  )]
  MissingOperand(usize),
  #[error(
    "expected AND or OR at position \
     {0}"
  )]
  MissingOperator(usize),
  #[error(
    "unbalanced parenthesis at \
     position {0}"
  )]
  UnbalancedParens(usize),
  #[error(
    "parentheses nested too deeply \
     at position {0}"
  )]
  TooDeep(usize)
}

/// A row the engine can filter. Field
/// names outside `field_names` resolve to
/// `None`.
pub trait FilterRow {
  fn field_names()
  -> &'static [&'static str]
  where
    Self: Sized;

  fn field_value(
    &self,
    field: &str
  ) -> Option<String>;
}

#[derive(Debug, Clone, Copy)]
enum Symbol {
  Value(bool),
  And,
  Or,
  Open,
  Close
}

fn lower<F>(
  elements: &[FilterElement],
  mut eval_term: F
) -> Result<Vec<Symbol>, FilterError>
where
  F: FnMut(
    &FilterTerm
  )
    -> Result<bool, FilterError>
{
  elements
    .iter()
    .map(|element| -> Result<Symbol, FilterError> {
      Ok(match element {
        | FilterElement::Filter(
          term
        ) => {
          Symbol::Value(eval_term(term)?)
        }
        | FilterElement::Operator {
          value: Connective::And
        } => Symbol::And,
        | FilterElement::Operator {
          value: Connective::Or
        } => Symbol::Or,
        | FilterElement::Parenthesis {
          value: Paren::Open
        } => Symbol::Open,
        | FilterElement::Parenthesis {
          value: Paren::Close
        } => Symbol::Close
      })
    })
    .collect()
}

/// AND and OR share one precedence level
/// and fold strictly left to right; only
/// explicit parentheses group.
struct Parser {
  symbols: Vec<Symbol>,
  pos:     usize,
  depth:   usize
}

impl Parser {
  fn new(symbols: Vec<Symbol>) -> Self {
    Self {
      symbols,
      pos: 0,
      depth: 0
    }
  }

  fn parse_expr(
    &mut self
  ) -> Result<bool, FilterError> {
    let mut acc =
      self.parse_operand()?;

    loop {
      match self.peek() {
        | Some(Symbol::And) => {
          self.pos += 1;
          let rhs =
            self.parse_operand()?;
          acc = acc && rhs;
        }
        | Some(Symbol::Or) => {
          self.pos += 1;
          let rhs =
            self.parse_operand()?;
          acc = acc || rhs;
        }
        | Some(
          Symbol::Value(_)
          | Symbol::Open
        ) => {
          return Err(
            FilterError::MissingOperator(
              self.pos
            )
          );
        }
        | Some(Symbol::Close)
        | None => break
      }
    }

    Ok(acc)
  }

  fn parse_operand(
    &mut self
  ) -> Result<bool, FilterError> {
    let at = self.pos;
    match self.next() {
      | Some(Symbol::Value(value)) => {
        Ok(value)
      }
      | Some(Symbol::Open) => {
        if self.depth >= MAX_NESTING {
          return Err(
            FilterError::TooDeep(at)
          );
        }
        self.depth += 1;
        let inner =
          self.parse_expr()?;
        self.depth -= 1;
        match self.next() {
          | Some(Symbol::Close) => {
            Ok(inner)
          }
          | _ => Err(
            FilterError::UnbalancedParens(
              at
            )
          )
        }
      }
      | Some(
        Symbol::And
        | Symbol::Or
        | Symbol::Close
      )
      | None => Err(
        FilterError::MissingOperand(at)
      )
    }
  }

  fn ensure_end(
    &self
  ) -> Result<(), FilterError> {
    if self.pos < self.symbols.len() {
      Err(FilterError::UnbalancedParens(
        self.pos
      ))
    } else {
      Ok(())
    }
  }

  fn peek(&self) -> Option<Symbol> {
    self.symbols.get(self.pos).copied()
  }

  fn next(&mut self) -> Option<Symbol> {
    let out = self.peek();
    if out.is_some() {
      self.pos += 1;
    }
    out
  }
}

fn run(
  symbols: Vec<Symbol>
) -> Result<bool, FilterError> {
  let mut parser = Parser::new(symbols);
  let value = parser.parse_expr()?;
  parser.ensure_end()?;
  Ok(value)
}

/// Evaluates the token stream against one
/// row. An empty stream matches every row.
pub fn evaluate<R: FilterRow>(
  elements: &[FilterElement],
  row: &R
) -> Result<bool, FilterError> {
  if elements.is_empty() {
    return Ok(true);
  }

  let symbols =
    lower(elements, |term| {
      let actual = row
        .field_value(&term.field)
        .ok_or_else(|| {
          FilterError::UnknownField(
            term.field.clone()
          )
        })?;
      let ok = term.test(&actual);
      trace!(field = %term.field, operator = term.operator.as_str(), value = %term.value, %actual, ok, "filter term evaluation");
      Ok(ok)
    })?;

  run(symbols)
}

/// Fail-open: a stream that cannot be
/// evaluated keeps the row.
pub fn matches<R: FilterRow>(
  elements: &[FilterElement],
  row: &R
) -> bool {
  match evaluate(elements, row) {
    | Ok(ok) => ok,
    | Err(error) => {
      warn!(%error, "filter expression could not be evaluated; keeping row");
      true
    }
  }
}

/// Structural check without a row, for
/// builders that want to flag a broken
/// stream before it is applied.
pub fn check<R: FilterRow>(
  elements: &[FilterElement]
) -> Result<(), FilterError> {
  if elements.is_empty() {
    return Ok(());
  }

  let symbols =
    lower(elements, |term| {
      if R::field_names()
        .contains(&term.field.as_str())
      {
        Ok(true)
      } else {
        Err(FilterError::UnknownField(
          term.field.clone()
        ))
      }
    })?;

  run(symbols).map(|_| ())
}

pub fn apply<R>(
  elements: &[FilterElement],
  rows: &[R]
) -> Vec<R>
where
  R: FilterRow + Clone
{
  if elements.is_empty() {
    return rows.to_vec();
  }

  rows
    .iter()
    .filter(|row| {
      matches(elements, *row)
    })
    .cloned()
    .collect()
}

/// Ordered token list edited by the
/// table's filter builder.
#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(transparent)]
pub struct FilterExpression {
  elements: Vec<FilterElement>
}

impl FilterExpression {
  pub fn new(
    elements: Vec<FilterElement>
  ) -> Self {
    Self {
      elements
    }
  }

  pub fn elements(
    &self
  ) -> &[FilterElement] {
    &self.elements
  }

  pub fn is_empty(&self) -> bool {
    self.elements.is_empty()
  }

  pub fn len(&self) -> usize {
    self.elements.len()
  }

  pub fn push(
    &mut self,
    element: FilterElement
  ) {
    self.elements.push(element);
  }

  pub fn remove_at(
    &mut self,
    index: usize
  ) -> Option<FilterElement> {
    if index < self.elements.len() {
      Some(self.elements.remove(index))
    } else {
      None
    }
  }

  /// Moves one token so that it ends up
  /// at index `to`. Out-of-range indices
  /// leave the list untouched.
  pub fn move_item(
    &mut self,
    from: usize,
    to: usize
  ) -> bool {
    let len = self.elements.len();
    if from >= len || to >= len {
      return false;
    }
    if from != to {
      let element =
        self.elements.remove(from);
      self.elements.insert(to, element);
    }
    true
  }

  pub fn clear(&mut self) {
    self.elements.clear();
  }

  pub fn matches<R: FilterRow>(
    &self,
    row: &R
  ) -> bool {
    matches(&self.elements, row)
  }

  pub fn apply<R>(
    &self,
    rows: &[R]
  ) -> Vec<R>
  where
    R: FilterRow + Clone
  {
    apply(&self.elements, rows)
  }

  pub fn check<R: FilterRow>(
    &self
  ) -> Result<(), FilterError> {
    check::<R>(&self.elements)
  }
}

impl fmt::Display for FilterExpression {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    let parts: Vec<String> = self
      .elements
      .iter()
      .map(ToString::to_string)
      .collect();
    f.write_str(&parts.join(" "))
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;

  #[derive(Debug, Clone)]
  struct Row(BTreeMap<String, String>);

  impl Row {
    fn new(pairs: &[(&str, &str)]) -> Self {
      Row(
        pairs
          .iter()
          .map(|(k, v)| {
            (k.to_string(), v.to_string())
          })
          .collect()
      )
    }
  }

  impl FilterRow for Row {
    fn field_names()
    -> &'static [&'static str] {
      &["name", "region", "lifecycleRule"]
    }

    fn field_value(
      &self,
      field: &str
    ) -> Option<String> {
      if !Self::field_names()
        .contains(&field)
      {
        return None;
      }
      Some(
        self
          .0
          .get(field)
          .cloned()
          .unwrap_or_else(|| {
            NOT_AVAILABLE.to_string()
          })
      )
    }
  }

  fn name(
    op: Operator,
    value: &str
  ) -> FilterElement {
    FilterElement::Filter(
      FilterTerm::new("name", op, value)
    )
  }

  #[test]
  fn operators_ignore_case() {
    let row =
      Row::new(&[("name", "Logs-Archive")]);

    for (op, value, expected) in [
      (Operator::Contains, "ARCH", true),
      (Operator::Equals, "logs-archive", true),
      (Operator::Equals, "logs", false),
      (Operator::StartsWith, "LOGS", true),
      (Operator::EndsWith, "Archive", true),
      (Operator::EndsWith, "logs", false),
      (Operator::IsEmpty, "", false),
      (Operator::IsNotEmpty, "", true)
    ] {
      assert_eq!(
        evaluate(&[name(op, value)], &row)
          .unwrap(),
        expected,
        "{op:?} {value}"
      );
    }
  }

  #[test]
  fn emptiness_treats_not_available_as_empty()
  {
    let row = Row::new(&[("name", "x")]);
    let empty = FilterElement::Filter(
      FilterTerm::new(
        "lifecycleRule",
        Operator::IsEmpty,
        ""
      )
    );
    assert!(
      evaluate(&[empty], &row).unwrap()
    );
  }

  #[test]
  fn connectives_fold_left_to_right() {
    let row = Row::new(&[("name", "alpha")]);
    let yes = || {
      name(Operator::Contains, "alp")
    };
    let no = || {
      name(Operator::Contains, "zzz")
    };

    // (yes OR no) AND no
    let flat = vec![
      yes(),
      FilterElement::or(),
      no(),
      FilterElement::and(),
      no(),
    ];
    assert!(!evaluate(&flat, &row).unwrap());

    // yes OR (no AND no)
    let grouped = vec![
      yes(),
      FilterElement::or(),
      FilterElement::open(),
      no(),
      FilterElement::and(),
      no(),
      FilterElement::close(),
    ];
    assert!(
      evaluate(&grouped, &row).unwrap()
    );
  }

  #[test]
  fn malformed_streams_fail_open() {
    let row = Row::new(&[("name", "alpha")]);
    let no = || {
      name(Operator::Equals, "beta")
    };

    let adjacent = vec![no(), no()];
    assert_eq!(
      evaluate(&adjacent, &row),
      Err(FilterError::MissingOperator(1))
    );
    assert!(matches(&adjacent, &row));

    let unclosed =
      vec![FilterElement::open(), no()];
    assert_eq!(
      evaluate(&unclosed, &row),
      Err(FilterError::UnbalancedParens(0))
    );
    assert!(matches(&unclosed, &row));

    let stray_close =
      vec![no(), FilterElement::close()];
    assert_eq!(
      evaluate(&stray_close, &row),
      Err(FilterError::UnbalancedParens(1))
    );

    let dangling =
      vec![no(), FilterElement::and()];
    assert_eq!(
      evaluate(&dangling, &row),
      Err(FilterError::MissingOperand(2))
    );

    let empty_group = vec![
      FilterElement::open(),
      FilterElement::close(),
    ];
    assert_eq!(
      evaluate(&empty_group, &row),
      Err(FilterError::MissingOperand(1))
    );
  }

  #[test]
  fn deep_nesting_is_rejected_and_keeps_row()
  {
    let row = Row::new(&[("name", "alpha")]);
    let nested = |depth: usize| {
      let mut stream =
        vec![FilterElement::open(); depth];
      stream.push(name(
        Operator::Contains,
        "zzz"
      ));
      stream.extend(
        vec![FilterElement::close(); depth]
      );
      stream
    };

    assert_eq!(
      evaluate(&nested(MAX_NESTING), &row),
      Ok(false)
    );

    let too_deep = nested(10_000);
    assert_eq!(
      evaluate(&too_deep, &row),
      Err(FilterError::TooDeep(MAX_NESTING))
    );
    assert!(matches(&too_deep, &row));
    assert!(
      check::<Row>(&too_deep).is_err()
    );
  }

  #[test]
  fn unknown_field_is_an_error_but_keeps_row()
  {
    let row = Row::new(&[("name", "a")]);
    let bogus = vec![FilterElement::Filter(
      FilterTerm::new(
        "owner",
        Operator::Equals,
        "me"
      )
    )];
    assert_eq!(
      evaluate(&bogus, &row),
      Err(FilterError::UnknownField(
        "owner".to_string()
      ))
    );
    assert!(matches(&bogus, &row));
    assert!(check::<Row>(&bogus).is_err());
  }

  #[test]
  fn empty_stream_is_identity() {
    let rows = vec![
      Row::new(&[("name", "a")]),
      Row::new(&[("name", "b")]),
    ];
    assert_eq!(apply(&[], &rows).len(), 2);
  }

  #[test]
  fn expression_edits_reorder_and_remove() {
    let mut expr = FilterExpression::default();
    expr.push(name(Operator::Contains, "a"));
    expr.push(FilterElement::and());
    expr.push(name(Operator::Contains, "b"));

    assert!(expr.move_item(2, 0));
    assert_eq!(
      expr.to_string(),
      "name contains \"b\" name contains \"a\" AND"
    );
    assert!(!expr.move_item(0, 3));
    assert!(expr.check::<Row>().is_err());

    assert_eq!(
      expr.remove_at(1),
      Some(name(Operator::Contains, "a"))
    );
    assert_eq!(expr.remove_at(5), None);
    assert_eq!(expr.len(), 2);
  }

  #[test]
  fn tokens_serialize_tagged_by_type() {
    let expr = FilterExpression::new(vec![
      FilterElement::open(),
      name(Operator::StartsWith, "prod"),
      FilterElement::or(),
      FilterElement::close(),
    ]);
    let json =
      serde_json::to_value(&expr).unwrap();
    assert_eq!(
      json,
      serde_json::json!([
        {"type": "parenthesis", "value": "("},
        {"type": "filter", "field": "name", "operator": "startsWith", "value": "prod"},
        {"type": "operator", "value": "OR"},
        {"type": "parenthesis", "value": ")"}
      ])
    );
    let back: FilterExpression =
      serde_json::from_value(json).unwrap();
    assert_eq!(back, expr);
  }
}
