//! REST client against a mock HTTP server

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xfcollab::client::{
    ClientConfig, CollaborationControl, DiagramPersistence, DiagramStateSource, RestDiagramApi, TransportError,
};
use xfcollab::shared::diagram::{Cell, UpdateVector};

use crate::{assert_contains, assert_err, assert_ok};

const DIAGRAM_PATH: &str = "/threat_models/tm1/diagrams/d1";

fn api(server: &MockServer) -> RestDiagramApi {
    let mut config = assert_ok!(ClientConfig::new("tm1", "d1").with_server_url(server.uri()));
    config.set_token(Some("test-token".to_string()));
    RestDiagramApi::new(config)
}

#[tokio::test]
async fn test_fetch_diagram_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DIAGRAM_PATH))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "d1",
            "name": "Data flow",
            "update_vector": 42,
            "cells": [{"id": "c1", "shape": "process"}, {"id": "c2", "shape": "edge"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = assert_ok!(api(&server).fetch_diagram_state().await);

    assert_eq!(snapshot.diagram_id, "d1");
    assert_eq!(snapshot.update_vector, UpdateVector(42));
    assert_eq!(snapshot.cells.len(), 2);
}

#[tokio::test]
async fn test_fetch_maps_auth_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DIAGRAM_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = api(&server).fetch_diagram_state().await;
    assert_err!(result, TransportError::Unauthorized);
}

#[tokio::test]
async fn test_fetch_reports_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DIAGRAM_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let error = api(&server).fetch_diagram_state().await.unwrap_err();
    assert!(matches!(error, TransportError::Status { status: 503, .. }));
    assert_contains!(error.to_string(), "maintenance");
}

#[tokio::test]
async fn test_save_sends_json_patch_of_cells() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(DIAGRAM_PATH))
        .and(header("Content-Type", "application/json-patch+json"))
        .and(body_json(json!([{
            "op": "replace",
            "path": "/cells",
            "value": [{"id": "c1", "shape": "process"}]
        }])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "d1"})))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(api(&server).save_cells(&[Cell::new("c1", "process")]).await);
}

#[tokio::test]
async fn test_end_collaboration() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/threat_models/tm1/diagrams/d1/collaborate"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(api(&server).end_collaboration().await);
}

#[tokio::test]
async fn test_end_collaboration_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/threat_models/tm1/diagrams/d1/collaborate"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = api(&server).end_collaboration().await;
    assert_err!(result, TransportError::Forbidden);
}
