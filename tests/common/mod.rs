#![allow(dead_code)]

use httpmock::{
    Method::{GET, POST},
    Mock, MockServer,
};
use mustlink::{Client, Credentials};
use serde_json::json;
use std::path::{Path, PathBuf};

pub const LOGIN: &str = "userone";
pub const PASSWORD: &str = "blah";
pub const TOKEN: &str = "token-userone";
pub const PROVIDER: &str = "BEPICRUISE";

pub fn setup_server() -> MockServer {
    MockServer::start()
}

pub fn write_config(dir: &Path, login: &str, password: &str) -> PathBuf {
    let path = dir.join("mustlink.yml");
    std::fs::write(
        &path,
        format!("user:\n    login: \"{login}\"\n    password: \"{password}\"\n"),
    )
    .unwrap();
    path
}

pub fn mock_login_as<'a>(server: &'a MockServer, login: &str, password: &str, token: &str) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path("/auth/login")
            .json_body(json!({"username": login, "password": password, "maxDuration": "false"}));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"token": token}));
    })
}

pub fn mock_userinfo_as<'a>(server: &'a MockServer, login: &str, token: &str) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/usermanagement/userinfo")
            .header("Authorization", token);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"login": login, "name": "Test User", "roles": ["USER"]}));
    })
}

pub fn mock_providers(server: &MockServer) -> Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path("/dataproviders");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([
                {"name": PROVIDER, "user": "webmust"},
                {"name": "BEPIPFM", "user": "webmust"},
                {"name": "SCRIPTED", "user": "SCRIPTING ENGINE"},
                {"name": "ORPHAN", "user": null}
            ]));
    })
}

/// Mocks the three requests a client sends while being built.
pub fn mock_handshake(server: &MockServer) -> (Mock<'_>, Mock<'_>, Mock<'_>) {
    (
        mock_login_as(server, LOGIN, PASSWORD, TOKEN),
        mock_userinfo_as(server, LOGIN, TOKEN),
        mock_providers(server),
    )
}

/// A client logged in against `server` with `PROVIDER` as default provider.
pub fn client(server: &MockServer) -> Client {
    Client::builder()
        .url(server.base_url())
        .credentials(Credentials::new(LOGIN, PASSWORD))
        .provider(PROVIDER)
        .build()
        .unwrap()
}
