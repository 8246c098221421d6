//! Subgraph endpoints and root-field ownership read from a supergraph SDL.
//!
//! Only the `join__` metadata is interpreted: the `join__Graph` enum names the
//! subgraphs and their URLs, and `@join__type` / `@join__field` on the root
//! types say which subgraph resolves each root field.

use std::collections::HashMap;

use async_graphql_parser::Positioned;
use async_graphql_parser::types::{ConstDirective, TypeKind, TypeSystemDefinition};
use async_graphql_value::ConstValue;
use serde::{Deserialize, Serialize};

use crate::error::SupergraphError;
use crate::operation::{GraphQLError, Operation, OperationKind, error_codes};

/// A named subgraph and the URL it is served from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubgraphEndpoint {
    pub name: String,
    pub url: String,
}

impl SubgraphEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Where an operation is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePlan<'a> {
    /// Only `__typename` was selected; answered by the gateway.
    Local { root_type: &'a str },
    /// Forwarded as-is to one subgraph.
    Subgraph(&'a SubgraphEndpoint),
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    subgraphs: Vec<SubgraphEndpoint>,
    root_types: HashMap<OperationKind, String>,
    owners: HashMap<OperationKind, HashMap<String, Vec<usize>>>,
}

impl RoutingTable {
    pub fn from_supergraph_sdl(sdl: &str) -> Result<Self, SupergraphError> {
        let document = async_graphql_parser::parse_schema(sdl)
            .map_err(|e| SupergraphError::InvalidSupergraph(e.to_string()))?;

        let mut root_types: HashMap<OperationKind, String> = [
            OperationKind::Query,
            OperationKind::Mutation,
            OperationKind::Subscription,
        ]
        .into_iter()
        .map(|kind| (kind, kind.default_root_type().to_string()))
        .collect();

        let mut subgraphs = Vec::new();
        let mut graph_index = HashMap::new();

        for definition in &document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema) => {
                    let schema = &schema.node;
                    for (kind, name) in [
                        (OperationKind::Query, &schema.query),
                        (OperationKind::Mutation, &schema.mutation),
                        (OperationKind::Subscription, &schema.subscription),
                    ] {
                        if let Some(name) = name {
                            root_types.insert(kind, name.node.to_string());
                        }
                    }
                }
                TypeSystemDefinition::Type(ty) if ty.node.name.node.as_str() == "join__Graph" => {
                    let TypeKind::Enum(graphs) = &ty.node.kind else {
                        return Err(SupergraphError::InvalidSupergraph(
                            "join__Graph must be an enum".into(),
                        ));
                    };
                    for value in &graphs.values {
                        let Some(directive) = find_directive(&value.node.directives, "join__graph")
                        else {
                            continue;
                        };
                        let (Some(name), Some(url)) = (
                            string_argument(directive, "name"),
                            string_argument(directive, "url"),
                        ) else {
                            return Err(SupergraphError::InvalidSupergraph(format!(
                                "@join__graph on {} needs name and url",
                                value.node.value.node
                            )));
                        };
                        graph_index.insert(value.node.value.node.to_string(), subgraphs.len());
                        subgraphs.push(SubgraphEndpoint::new(name, url));
                    }
                }
                _ => {}
            }
        }

        if subgraphs.is_empty() {
            return Err(SupergraphError::InvalidSupergraph(
                "supergraph declares no subgraphs".into(),
            ));
        }

        let mut owners: HashMap<OperationKind, HashMap<String, Vec<usize>>> = HashMap::new();
        for definition in &document.definitions {
            let TypeSystemDefinition::Type(ty) = definition else {
                continue;
            };
            let type_name = ty.node.name.node.as_str();
            let Some(kind) = root_types
                .iter()
                .find_map(|(kind, name)| (name == type_name).then_some(*kind))
            else {
                continue;
            };
            let TypeKind::Object(object) = &ty.node.kind else {
                continue;
            };

            let type_graphs = graphs_of(&ty.node.directives, "join__type", &graph_index);
            let fields = owners.entry(kind).or_default();
            for field in &object.fields {
                let mut graphs = graphs_of(&field.node.directives, "join__field", &graph_index);
                if graphs.is_empty() {
                    graphs.clone_from(&type_graphs);
                }
                let entry = fields.entry(field.node.name.node.to_string()).or_default();
                for graph in graphs {
                    if !entry.contains(&graph) {
                        entry.push(graph);
                    }
                }
            }
        }

        Ok(Self {
            subgraphs,
            root_types,
            owners,
        })
    }

    pub fn subgraphs(&self) -> &[SubgraphEndpoint] {
        &self.subgraphs
    }

    pub fn root_type(&self, kind: OperationKind) -> &str {
        self.root_types
            .get(&kind)
            .map_or(kind.default_root_type(), String::as_str)
    }

    /// Subgraphs able to resolve `field` on the root type of `kind`.
    pub fn owners_of(&self, kind: OperationKind, field: &str) -> Vec<&SubgraphEndpoint> {
        self.owners
            .get(&kind)
            .and_then(|fields| fields.get(field))
            .map(|indexes| {
                indexes
                    .iter()
                    .filter_map(|&i| self.subgraphs.get(i))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Picks the subgraph that resolves every root field of `operation`.
    pub fn plan(&self, operation: &Operation) -> Result<RoutePlan<'_>, GraphQLError> {
        let kind = operation.kind();
        let root_type = self.root_type(kind);
        let fields = self.owners.get(&kind);

        let mut candidates: Option<Vec<usize>> = None;
        let mut introspection = false;

        for field in operation.root_fields() {
            if field.is_typename() {
                continue;
            }
            if field.is_introspection() {
                introspection = true;
                continue;
            }

            let Some(owners) = fields.and_then(|fields| fields.get(&field.name)) else {
                return Err(GraphQLError::new(format!(
                    "Cannot query field \"{}\" on type \"{}\".",
                    field.name, root_type
                ))
                .with_code(error_codes::GRAPHQL_VALIDATION_FAILED));
            };

            candidates = Some(match candidates {
                None => owners.clone(),
                Some(current) => current.into_iter().filter(|i| owners.contains(i)).collect(),
            });
        }

        match candidates {
            None if introspection => Err(GraphQLError::new(
                "Introspection of the supergraph is not available on this gateway",
            )
            .with_code(error_codes::QUERY_PLANNING_FAILED)),
            None => Ok(RoutePlan::Local { root_type }),
            Some(candidates) => candidates
                .first()
                .and_then(|&i| self.subgraphs.get(i))
                .map(RoutePlan::Subgraph)
                .ok_or_else(|| {
                    GraphQLError::new(
                        "Operation selects root fields owned by different subgraphs; split it into separate operations",
                    )
                    .with_code(error_codes::QUERY_PLANNING_FAILED)
                }),
        }
    }
}

fn find_directive<'a>(
    directives: &'a [Positioned<ConstDirective>],
    name: &str,
) -> Option<&'a ConstDirective> {
    directives
        .iter()
        .map(|d| &d.node)
        .find(|d| d.name.node.as_str() == name)
}

fn string_argument(directive: &ConstDirective, name: &str) -> Option<String> {
    match directive.get_argument(name).map(|v| &v.node) {
        Some(ConstValue::String(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Graph indexes named by every `@<directive>(graph: X)` in `directives`.
///
/// `@join__field(external: true)` marks a field the graph does not resolve.
fn graphs_of(
    directives: &[Positioned<ConstDirective>],
    directive: &str,
    graph_index: &HashMap<String, usize>,
) -> Vec<usize> {
    directives
        .iter()
        .map(|d| &d.node)
        .filter(|d| d.name.node.as_str() == directive)
        .filter(|d| {
            !matches!(
                d.get_argument("external").map(|v| &v.node),
                Some(ConstValue::Boolean(true))
            )
        })
        .filter_map(|d| match d.get_argument("graph").map(|v| &v.node) {
            Some(ConstValue::Enum(graph)) => graph_index.get(graph.as_str()).copied(),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::GraphQLRequest;

    const SUPERGRAPH: &str = r#"
schema
  @link(url: "https://specs.apollo.dev/link/v1.0")
  @link(url: "https://specs.apollo.dev/join/v0.3", for: EXECUTION)
{
  query: Query
  mutation: Mutation
}

enum join__Graph {
  CUSTOMERS @join__graph(name: "customers", url: "http://customers:4002/graphql")
  PRODUCTS @join__graph(name: "products", url: "http://products:4001/graphql")
}

type Query
  @join__type(graph: CUSTOMERS)
  @join__type(graph: PRODUCTS)
{
  me: Customer @join__field(graph: CUSTOMERS)
  products(first: Int = 10): [Product] @join__field(graph: PRODUCTS)
  health: String
}

type Mutation
  @join__type(graph: CUSTOMERS)
{
  login(email: String!, password: String!): LoginResult
  logout: LogoutResult
}
"#;

    fn plan_of(table: &RoutingTable, query: &str) -> Result<String, GraphQLError> {
        let operation = Operation::parse(GraphQLRequest::new(query)).unwrap();
        table.plan(&operation).map(|plan| match plan {
            RoutePlan::Local { root_type } => format!("local:{root_type}"),
            RoutePlan::Subgraph(endpoint) => endpoint.name.clone(),
        })
    }

    #[test]
    fn test_reads_subgraphs_from_join_graph() {
        let table = RoutingTable::from_supergraph_sdl(SUPERGRAPH).unwrap();

        assert_eq!(
            table.subgraphs(),
            [
                SubgraphEndpoint::new("customers", "http://customers:4002/graphql"),
                SubgraphEndpoint::new("products", "http://products:4001/graphql"),
            ]
        );
    }

    #[test]
    fn test_field_ownership() {
        let table = RoutingTable::from_supergraph_sdl(SUPERGRAPH).unwrap();

        let names = |field| -> Vec<String> {
            table
                .owners_of(OperationKind::Query, field)
                .into_iter()
                .map(|e| e.name.clone())
                .collect()
        };
        assert_eq!(names("me"), ["customers"]);
        assert_eq!(names("products"), ["products"]);
        assert_eq!(names("health"), ["customers", "products"]);
        assert_eq!(
            table.owners_of(OperationKind::Mutation, "login")[0].name,
            "customers"
        );
    }

    #[test]
    fn test_plans() {
        let table = RoutingTable::from_supergraph_sdl(SUPERGRAPH).unwrap();

        assert_eq!(plan_of(&table, "{ products { id } }").unwrap(), "products");
        assert_eq!(plan_of(&table, "{ me { id } health }").unwrap(), "customers");
        assert_eq!(plan_of(&table, "{ __typename }").unwrap(), "local:Query");
        assert_eq!(
            plan_of(&table, "mutation { logout { success } }").unwrap(),
            "customers"
        );

        let err = plan_of(&table, "{ me { id } products { id } }").unwrap_err();
        assert_eq!(err.code(), Some(error_codes::QUERY_PLANNING_FAILED));

        let err = plan_of(&table, "{ unknown }").unwrap_err();
        assert_eq!(err.code(), Some(error_codes::GRAPHQL_VALIDATION_FAILED));
    }

    #[test]
    fn test_rejects_supergraph_without_graphs() {
        let err = RoutingTable::from_supergraph_sdl("type Query { a: Int }").unwrap_err();
        assert!(matches!(err, SupergraphError::InvalidSupergraph(_)));

        let err = RoutingTable::from_supergraph_sdl("type Query {").unwrap_err();
        assert!(matches!(err, SupergraphError::InvalidSupergraph(_)));
    }
}
