//! Query execution against the active supergraph.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::datasource::{OperationContext, RemoteSubgraph, SubgraphRequestHook};
use crate::descriptor::SupergraphDescriptor;
use crate::error::SupergraphError;
use crate::operation::{GraphQLError, GraphQLResponse, Operation, OperationKind, error_codes};
use crate::routing::{RoutePlan, RoutingTable};

/// Executes operations for one supergraph.
///
/// An executor is built per descriptor and never sees a different one; a
/// reload builds a new executor.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, operation: &Operation, context: &OperationContext) -> GraphQLResponse;
}

/// Builds an executor for a freshly acquired descriptor.
pub trait ExecutorFactory: Send + Sync {
    fn build(
        &self,
        descriptor: &SupergraphDescriptor,
    ) -> Result<Arc<dyn QueryExecutor>, SupergraphError>;
}

/// Builds [`RoutingExecutor`]s sharing one HTTP client and hook chain.
#[derive(Clone)]
pub struct RoutingExecutorFactory {
    client: reqwest::Client,
    hooks: Vec<Arc<dyn SubgraphRequestHook>>,
}

impl RoutingExecutorFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            hooks: Vec::new(),
        }
    }

    /// Appends a hook run on every outbound subgraph call.
    pub fn with_hook(mut self, hook: Arc<dyn SubgraphRequestHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl ExecutorFactory for RoutingExecutorFactory {
    fn build(
        &self,
        descriptor: &SupergraphDescriptor,
    ) -> Result<Arc<dyn QueryExecutor>, SupergraphError> {
        let table = RoutingTable::from_supergraph_sdl(descriptor.sdl())?;
        let hooks: Arc<[Arc<dyn SubgraphRequestHook>]> = self.hooks.clone().into();

        let subgraphs = table
            .subgraphs()
            .iter()
            .map(|endpoint| {
                (
                    endpoint.name.clone(),
                    RemoteSubgraph::new(endpoint.clone(), self.client.clone(), hooks.clone()),
                )
            })
            .collect();

        tracing::debug!(
            subgraphs = table.subgraphs().len(),
            "routing executor built"
        );
        Ok(Arc::new(RoutingExecutor { table, subgraphs }))
    }
}

/// Forwards each operation to the single subgraph owning its root fields.
pub struct RoutingExecutor {
    table: RoutingTable,
    subgraphs: HashMap<String, RemoteSubgraph>,
}

impl RoutingExecutor {
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }
}

#[async_trait]
impl QueryExecutor for RoutingExecutor {
    async fn execute(&self, operation: &Operation, context: &OperationContext) -> GraphQLResponse {
        if operation.kind() == OperationKind::Subscription {
            return GraphQLResponse::from_error(
                GraphQLError::new("Subscriptions are not supported by this gateway")
                    .with_code(error_codes::BAD_REQUEST),
            );
        }

        match self.table.plan(operation) {
            Ok(RoutePlan::Local { root_type }) => {
                let data: Map<String, Value> = operation
                    .root_fields()
                    .iter()
                    .map(|field| (field.response_key.clone(), Value::from(root_type)))
                    .collect();
                GraphQLResponse::from_data(Value::Object(data))
            }
            Ok(RoutePlan::Subgraph(endpoint)) => match self.subgraphs.get(&endpoint.name) {
                Some(subgraph) => {
                    tracing::debug!(
                        subgraph = %endpoint.name,
                        operation = operation.name().unwrap_or("<anonymous>"),
                        "routing operation"
                    );
                    subgraph.execute(operation.request().clone(), context).await
                }
                None => GraphQLResponse::from_error(
                    GraphQLError::new(format!("No data source for subgraph {}", endpoint.name))
                        .with_code(error_codes::INTERNAL_SERVER_ERROR),
                ),
            },
            Err(error) => GraphQLResponse::from_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::operation::GraphQLRequest;

    fn supergraph(products_url: &str, customers_url: &str) -> SupergraphDescriptor {
        let sdl = format!(
            r#"
enum join__Graph {{
  CUSTOMERS @join__graph(name: "customers", url: "{customers_url}")
  PRODUCTS @join__graph(name: "products", url: "{products_url}")
}}
type Query @join__type(graph: CUSTOMERS) @join__type(graph: PRODUCTS) {{
  me: Customer @join__field(graph: CUSTOMERS)
  products: [Product] @join__field(graph: PRODUCTS)
}}
type Subscription @join__type(graph: PRODUCTS) {{
  priceChanged: Product
}}
"#
        );
        SupergraphDescriptor::new(sdl, "test")
    }

    fn operation(query: &str) -> Operation {
        Operation::parse(GraphQLRequest::new(query)).unwrap()
    }

    #[tokio::test]
    async fn test_forwards_to_owning_subgraph() {
        let products = MockServer::start().await;
        let customers = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"query": "{ products { id } }"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"products": []}})),
            )
            .expect(1)
            .mount(&products)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&customers)
            .await;

        let executor = RoutingExecutorFactory::new(reqwest::Client::new())
            .build(&supergraph(&products.uri(), &customers.uri()))
            .unwrap();

        let response = executor
            .execute(&operation("{ products { id } }"), &OperationContext::default())
            .await;
        assert_eq!(response.data, Some(json!({"products": []})));
    }

    #[tokio::test]
    async fn test_typename_is_answered_locally() {
        let executor = RoutingExecutorFactory::new(reqwest::Client::new())
            .build(&supergraph("http://127.0.0.1:9", "http://127.0.0.1:9"))
            .unwrap();

        let response = executor
            .execute(&operation("{ t: __typename }"), &OperationContext::default())
            .await;
        assert_eq!(response.data, Some(json!({"t": "Query"})));
    }

    #[tokio::test]
    async fn test_subscriptions_are_rejected() {
        let executor = RoutingExecutorFactory::new(reqwest::Client::new())
            .build(&supergraph("http://127.0.0.1:9", "http://127.0.0.1:9"))
            .unwrap();

        let response = executor
            .execute(
                &operation("subscription { priceChanged { id } }"),
                &OperationContext::default(),
            )
            .await;
        assert_eq!(response.errors[0].code(), Some(error_codes::BAD_REQUEST));
    }

    #[test]
    fn test_build_rejects_invalid_supergraph() {
        let result = RoutingExecutorFactory::new(reqwest::Client::new())
            .build(&SupergraphDescriptor::new("not a schema {", "test"));
        assert!(matches!(result, Err(SupergraphError::InvalidSupergraph(_))));
    }
}
