//! Static supergraph acquisition from a fixed list of subgraphs.
//!
//! Each subgraph is asked for its SDL through the federation `_service`
//! field. The result is a routing supergraph: the `join__Graph` enum plus
//! the root types annotated with the subgraph that owns each field. Types
//! below the root are not merged; planning across subgraphs is left to the
//! query engine.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_graphql_parser::types::{FieldDefinition, TypeKind, TypeSystemDefinition};
use futures_util::future::try_join_all;
use serde::Deserialize;

use crate::error::SupergraphError;
use crate::operation::{GraphQLRequest, GraphQLResponse, OperationKind};
use crate::routing::SubgraphEndpoint;

/// Query every federated subgraph answers with its own SDL.
pub const SERVICE_SDL_QUERY: &str = "query __ApolloGetServiceDefinition__ { _service { sdl } }";

/// Source label recorded on composed descriptors.
pub const STATIC_SOURCE: &str = "introspect-and-compose";

/// Federation plumbing fields that are never routed.
const HIDDEN_ROOT_FIELDS: [&str; 2] = ["_service", "_entities"];

const ROUTING_PRELUDE: &str = r#"directive @join__field(graph: join__Graph, requires: join__FieldSet, provides: join__FieldSet, type: String, external: Boolean, override: String, usedOverridden: Boolean) repeatable on FIELD_DEFINITION | INPUT_FIELD_DEFINITION

directive @join__graph(name: String!, url: String!) on ENUM_VALUE

directive @join__type(graph: join__Graph!, key: join__FieldSet, extension: Boolean! = false, resolvable: Boolean! = true, isInterfaceObject: Boolean! = false) repeatable on OBJECT | INTERFACE | UNION | ENUM | INPUT_OBJECT | SCALAR

directive @link(url: String, as: String, for: link__Purpose, import: [link__Import]) repeatable on SCHEMA

scalar join__FieldSet

scalar link__Import

enum link__Purpose {
  SECURITY
  EXECUTION
}
"#;

#[derive(Deserialize)]
struct ServiceData {
    #[serde(rename = "_service")]
    service: ServiceSdl,
}

#[derive(Deserialize)]
struct ServiceSdl {
    sdl: String,
}

/// Composes a routing supergraph by introspecting a fixed set of subgraphs.
#[derive(Debug, Clone)]
pub struct IntrospectAndCompose {
    subgraphs: Vec<SubgraphEndpoint>,
    client: reqwest::Client,
}

impl IntrospectAndCompose {
    pub fn new(subgraphs: Vec<SubgraphEndpoint>, client: reqwest::Client) -> Self {
        Self { subgraphs, client }
    }

    pub fn subgraphs(&self) -> &[SubgraphEndpoint] {
        &self.subgraphs
    }

    /// Fetches every subgraph SDL concurrently and composes them.
    pub async fn compose(&self) -> Result<String, SupergraphError> {
        let sdls = try_join_all(self.subgraphs.iter().map(|s| self.introspect(s))).await?;
        let pairs: Vec<_> = self.subgraphs.iter().cloned().zip(sdls).collect();
        compose_routing_sdl(&pairs)
    }

    async fn introspect(&self, subgraph: &SubgraphEndpoint) -> Result<String, SupergraphError> {
        let response = self
            .client
            .post(&subgraph.url)
            .json(&GraphQLRequest::new(SERVICE_SDL_QUERY))
            .send()
            .await
            .map_err(|e| {
                SupergraphError::Fetch(format!("subgraph {}: {e}", subgraph.name))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SupergraphError::Status {
                status: status.as_u16(),
                reason: format!(
                    "{} (subgraph {})",
                    status.canonical_reason().unwrap_or_default(),
                    subgraph.name
                ),
            });
        }

        let body: GraphQLResponse = response.json().await?;
        if let Some(error) = body.errors.first() {
            return Err(SupergraphError::Composition(format!(
                "subgraph {} rejected the service query: {}",
                subgraph.name, error.message
            )));
        }

        let data = body.data.ok_or_else(|| {
            SupergraphError::Composition(format!("subgraph {} returned no data", subgraph.name))
        })?;
        let data: ServiceData = serde_json::from_value(data).map_err(|e| {
            SupergraphError::Composition(format!(
                "subgraph {} returned an unexpected service shape: {e}",
                subgraph.name
            ))
        })?;

        tracing::debug!(subgraph = %subgraph.name, "subgraph SDL fetched");
        Ok(data.service.sdl)
    }
}

struct OwnedField {
    graph: String,
    definition: String,
    shareable: bool,
}

/// Builds the routing supergraph SDL for `subgraphs` (endpoint, SDL) pairs.
///
/// A root field declared by two subgraphs is a conflict unless both mark it
/// `@shareable`; the first declaring subgraph then owns it.
pub fn compose_routing_sdl(
    subgraphs: &[(SubgraphEndpoint, String)],
) -> Result<String, SupergraphError> {
    if subgraphs.is_empty() {
        return Err(SupergraphError::Composition("no subgraphs declared".into()));
    }

    let mut graphs = Vec::with_capacity(subgraphs.len());
    let mut roots: BTreeMap<OperationKind, (Vec<String>, BTreeMap<String, OwnedField>)> =
        BTreeMap::new();

    for (endpoint, sdl) in subgraphs {
        let graph = graph_enum_value(&endpoint.name);
        let document = async_graphql_parser::parse_schema(sdl).map_err(|e| {
            SupergraphError::Composition(format!("subgraph {}: {e}", endpoint.name))
        })?;

        let mut root_names = BTreeMap::new();
        for definition in &document.definitions {
            if let TypeSystemDefinition::Schema(schema) = definition {
                let schema = &schema.node;
                for (kind, name) in [
                    (OperationKind::Query, &schema.query),
                    (OperationKind::Mutation, &schema.mutation),
                    (OperationKind::Subscription, &schema.subscription),
                ] {
                    if let Some(name) = name {
                        root_names.insert(name.node.to_string(), kind);
                    }
                }
            }
        }
        for kind in [
            OperationKind::Query,
            OperationKind::Mutation,
            OperationKind::Subscription,
        ] {
            if !root_names.values().any(|k| *k == kind) {
                root_names.insert(kind.default_root_type().to_string(), kind);
            }
        }

        for definition in &document.definitions {
            let TypeSystemDefinition::Type(ty) = definition else {
                continue;
            };
            let Some(&kind) = root_names.get(ty.node.name.node.as_str()) else {
                continue;
            };
            let TypeKind::Object(object) = &ty.node.kind else {
                continue;
            };

            let (type_graphs, fields) = roots.entry(kind).or_default();
            if !type_graphs.contains(&graph) {
                type_graphs.push(graph.clone());
            }

            for field in &object.fields {
                let name = field.node.name.node.to_string();
                if HIDDEN_ROOT_FIELDS.contains(&name.as_str()) {
                    continue;
                }
                let shareable = field
                    .node
                    .directives
                    .iter()
                    .any(|d| d.node.name.node.as_str() == "shareable");

                match fields.get(&name) {
                    Some(existing) if existing.shareable && shareable => {}
                    Some(existing) => {
                        return Err(SupergraphError::Composition(format!(
                            "field {}.{} is defined by both {} and {}",
                            kind.default_root_type(),
                            name,
                            existing.graph,
                            graph
                        )));
                    }
                    None => {
                        fields.insert(
                            name,
                            OwnedField {
                                graph: graph.clone(),
                                definition: print_field(&field.node),
                                shareable,
                            },
                        );
                    }
                }
            }
        }

        graphs.push((graph, endpoint));
    }

    let mut sdl = String::new();
    sdl.push_str("schema\n");
    sdl.push_str("  @link(url: \"https://specs.apollo.dev/link/v1.0\")\n");
    sdl.push_str("  @link(url: \"https://specs.apollo.dev/join/v0.3\", for: EXECUTION)\n{\n");
    for kind in roots.keys() {
        let _ = writeln!(sdl, "  {}: {}", kind.as_str(), kind.default_root_type());
    }
    sdl.push_str("}\n\n");
    sdl.push_str(ROUTING_PRELUDE);

    sdl.push_str("\nenum join__Graph {\n");
    for (graph, endpoint) in &graphs {
        let _ = writeln!(
            sdl,
            "  {graph} @join__graph(name: {}, url: {})",
            quote(&endpoint.name),
            quote(&endpoint.url)
        );
    }
    sdl.push_str("}\n");

    for (kind, (type_graphs, fields)) in &roots {
        if fields.is_empty() {
            continue;
        }
        let _ = write!(sdl, "\ntype {}\n", kind.default_root_type());
        for graph in type_graphs {
            let _ = writeln!(sdl, "  @join__type(graph: {graph})");
        }
        sdl.push_str("{\n");
        for field in fields.values() {
            let _ = writeln!(
                sdl,
                "  {} @join__field(graph: {})",
                field.definition, field.graph
            );
        }
        sdl.push_str("}\n");
    }

    Ok(sdl)
}

/// `join__Graph` value for a subgraph name: uppercase, `_` for anything
/// that is not alphanumeric.
fn graph_enum_value(name: &str) -> String {
    let mut value: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if value.starts_with(|c: char| c.is_ascii_digit()) {
        value.insert(0, '_');
    }
    value
}

fn print_field(field: &FieldDefinition) -> String {
    let mut out = field.name.node.to_string();
    if !field.arguments.is_empty() {
        let arguments: Vec<String> = field
            .arguments
            .iter()
            .map(|argument| {
                let argument = &argument.node;
                match &argument.default_value {
                    Some(default) => {
                        format!("{}: {} = {}", argument.name.node, argument.ty.node, default.node)
                    }
                    None => format!("{}: {}", argument.name.node, argument.ty.node),
                }
            })
            .collect();
        out.push('(');
        out.push_str(&arguments.join(", "));
        out.push(')');
    }
    let _ = write!(out, ": {}", field.ty.node);
    out
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
