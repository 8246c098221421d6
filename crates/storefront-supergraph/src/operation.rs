//! GraphQL wire types and operation analysis.
//!
//! Operations are parsed once at the edge so the gateway can decide
//! cacheability, reject introspection and route to a subgraph without
//! re-reading the document.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_graphql_parser::Positioned;
use async_graphql_parser::types::{
    DocumentOperations, FragmentDefinition, OperationDefinition, OperationType, Selection,
    SelectionSet,
};
use async_graphql_value::Name;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `extensions.code` values used by the gateway.
pub mod error_codes {
    pub const GRAPHQL_PARSE_FAILED: &str = "GRAPHQL_PARSE_FAILED";
    pub const GRAPHQL_VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const QUERY_PLANNING_FAILED: &str = "QUERY_PLANNING_FAILED";
    pub const DOWNSTREAM_SERVICE_ERROR: &str = "DOWNSTREAM_SERVICE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// A GraphQL-over-HTTP request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,

    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// A single entry of a response's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: Map::new(),
        }
    }

    pub fn with_code(self, code: &str) -> Self {
        self.with_extension("code", code)
    }

    pub fn with_extension(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.to_string(), value.into());
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

/// A GraphQL response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from_error(error: GraphQLError) -> Self {
        Self {
            errors: vec![error],
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Root operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }

    /// Conventional name of the root type for this kind.
    pub fn default_root_type(self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Mutation => "Mutation",
            Self::Subscription => "Subscription",
        }
    }
}

impl From<OperationType> for OperationKind {
    fn from(ty: OperationType) -> Self {
        match ty {
            OperationType::Query => Self::Query,
            OperationType::Mutation => Self::Mutation,
            OperationType::Subscription => Self::Subscription,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field selected directly on the root type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootField {
    /// Field name on the root type.
    pub name: String,
    /// Key under which the field appears in `data` (alias or name).
    pub response_key: String,
}

impl RootField {
    pub fn is_typename(&self) -> bool {
        self.name == "__typename"
    }

    pub fn is_introspection(&self) -> bool {
        self.name == "__schema" || self.name == "__type"
    }
}

/// Errors raised while resolving the operation to execute.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("{0}")]
    Syntax(String),

    #[error("Unknown operation named \"{0}\".")]
    UnknownOperation(String),

    #[error("Must provide operation name if query contains multiple operations.")]
    AmbiguousOperation,
}

impl OperationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax(_) => error_codes::GRAPHQL_PARSE_FAILED,
            Self::UnknownOperation(_) | Self::AmbiguousOperation => error_codes::BAD_REQUEST,
        }
    }

    pub fn to_graphql_error(&self) -> GraphQLError {
        GraphQLError::new(self.to_string()).with_code(self.code())
    }
}

/// A parsed request with its selected operation resolved.
#[derive(Debug, Clone)]
pub struct Operation {
    request: GraphQLRequest,
    kind: OperationKind,
    name: Option<String>,
    root_fields: Vec<RootField>,
}

impl Operation {
    pub fn parse(request: GraphQLRequest) -> Result<Self, OperationError> {
        let document = async_graphql_parser::parse_query(&request.query)
            .map_err(|e| OperationError::Syntax(e.to_string()))?;

        let (name, definition) =
            select_operation(&document.operations, request.operation_name.as_deref())?;

        let mut root_fields = Vec::new();
        let mut visited = HashSet::new();
        collect_root_fields(
            &definition.selection_set.node,
            &document.fragments,
            &mut visited,
            &mut root_fields,
        );

        Ok(Self {
            kind: definition.ty.into(),
            name,
            root_fields,
            request,
        })
    }

    pub fn request(&self) -> &GraphQLRequest {
        &self.request
    }

    pub fn query(&self) -> &str {
        &self.request.query
    }

    pub fn variables(&self) -> Option<&Value> {
        self.request.variables.as_ref()
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Name of the selected operation, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn root_fields(&self) -> &[RootField] {
        &self.root_fields
    }

    /// Whether the operation selects `__schema` or `__type`.
    pub fn is_introspection(&self) -> bool {
        self.root_fields.iter().any(RootField::is_introspection)
    }
}

fn select_operation<'a>(
    operations: &'a DocumentOperations,
    requested: Option<&str>,
) -> Result<(Option<String>, &'a OperationDefinition), OperationError> {
    match operations {
        DocumentOperations::Single(operation) => match requested {
            Some(name) => Err(OperationError::UnknownOperation(name.to_string())),
            None => Ok((None, &operation.node)),
        },
        DocumentOperations::Multiple(operations) => match requested {
            Some(name) => operations
                .get(name)
                .map(|operation| (Some(name.to_string()), &operation.node))
                .ok_or_else(|| OperationError::UnknownOperation(name.to_string())),
            None if operations.len() == 1 => operations
                .iter()
                .next()
                .map(|(name, operation)| (Some(name.to_string()), &operation.node))
                .ok_or(OperationError::AmbiguousOperation),
            None => Err(OperationError::AmbiguousOperation),
        },
    }
}

fn collect_root_fields(
    selection_set: &SelectionSet,
    fragments: &HashMap<Name, Positioned<FragmentDefinition>>,
    visited: &mut HashSet<Name>,
    out: &mut Vec<RootField>,
) {
    for selection in &selection_set.items {
        match &selection.node {
            Selection::Field(field) => {
                let name = field.node.name.node.to_string();
                let response_key = field
                    .node
                    .alias
                    .as_ref()
                    .map_or_else(|| name.clone(), |alias| alias.node.to_string());
                if !out.iter().any(|f| f.response_key == response_key) {
                    out.push(RootField { name, response_key });
                }
            }
            Selection::InlineFragment(fragment) => {
                collect_root_fields(&fragment.node.selection_set.node, fragments, visited, out);
            }
            Selection::FragmentSpread(spread) => {
                let fragment_name = &spread.node.fragment_name.node;
                if visited.insert(fragment_name.clone())
                    && let Some(fragment) = fragments.get(fragment_name)
                {
                    collect_root_fields(&fragment.node.selection_set.node, fragments, visited, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Result<Operation, OperationError> {
        Operation::parse(GraphQLRequest::new(query))
    }

    fn field_names(operation: &Operation) -> Vec<&str> {
        operation.root_fields().iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_anonymous_query() {
        let op = parse("{ products { id } cart { id } }").unwrap();

        assert_eq!(op.kind(), OperationKind::Query);
        assert_eq!(op.name(), None);
        assert_eq!(field_names(&op), ["products", "cart"]);
    }

    #[test]
    fn test_named_mutation_with_alias() {
        let op = parse(
            r#"mutation SignIn { session: login(email: "a", password: "b") { token } }"#,
        )
        .unwrap();

        assert_eq!(op.kind(), OperationKind::Mutation);
        assert_eq!(op.name(), Some("SignIn"));
        assert_eq!(op.root_fields()[0].name, "login");
        assert_eq!(op.root_fields()[0].response_key, "session");
    }

    #[test]
    fn test_root_fields_through_fragments() {
        let op = parse(
            "query Q { ...Root ... on Query { cart { id } } }
             fragment Root on Query { products { id } }",
        )
        .unwrap();

        assert_eq!(field_names(&op), ["products", "cart"]);
    }

    #[test]
    fn test_operation_selection_by_name() {
        let query = "query A { products { id } } mutation B { logout { success } }";

        let mut request = GraphQLRequest::new(query);
        request.operation_name = Some("B".into());
        let op = Operation::parse(request).unwrap();
        assert_eq!(op.kind(), OperationKind::Mutation);

        assert_eq!(
            parse(query).unwrap_err(),
            OperationError::AmbiguousOperation
        );

        let mut request = GraphQLRequest::new(query);
        request.operation_name = Some("C".into());
        let err = Operation::parse(request).unwrap_err();
        assert_eq!(err.code(), error_codes::BAD_REQUEST);
    }

    #[test]
    fn test_syntax_error_code() {
        let err = parse("{ products { id }").unwrap_err();
        assert_eq!(err.code(), error_codes::GRAPHQL_PARSE_FAILED);
        assert_eq!(
            err.to_graphql_error().code(),
            Some(error_codes::GRAPHQL_PARSE_FAILED)
        );
    }

    #[test]
    fn test_introspection_detection() {
        assert!(parse("{ __schema { types { name } } }").unwrap().is_introspection());
        assert!(!parse("{ __typename }").unwrap().is_introspection());
    }

    #[test]
    fn test_response_serialization_omits_empty_parts() {
        let response = GraphQLResponse::from_data(serde_json::json!({"a": 1}));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"data": {"a": 1}})
        );

        let response = GraphQLResponse::from_error(GraphQLError::new("boom").with_code("X"));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"errors": [{"message": "boom", "extensions": {"code": "X"}}]})
        );
    }
}
