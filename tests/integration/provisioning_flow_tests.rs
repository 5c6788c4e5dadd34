//! Exercises the Bluetooth JSON provisioning protocol end to end against a
//! real (test-generated) RSA key, with no live host tools involved — only
//! the `MSG_READ_DEVICE_ID` path and malformed-input handling, since a
//! successful `MSG_PROVISION_WIFI` would need a real `nmcli` on the host.

use std::sync::Arc;

use ncb_edge_core::bluetooth::protocol::{self, ProtocolContext, ProvisionRequest, MSG_READ_DEVICE_ID};
use ncb_edge_core::config::{AppSettings, DeviceIdentity};
use ncb_edge_core::crypto::{self, Signer};
use ncb_edge_core::net::{ScanCache, WifiStateManager};
use rand::rngs::OsRng;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::sync::Mutex;

fn generate_test_keypair() -> (Signer, String) {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("keygen");
    let public_key = RsaPublicKey::from(&private_key);
    let public_pem = public_key.to_public_key_pem(rsa::pkcs8::LineEnding::LF).unwrap();
    let private_pem = private_key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string();

    let path = std::env::temp_dir().join(format!("provisioning_flow_test_key_{}.pem", std::process::id()));
    std::fs::write(&path, private_pem).unwrap();
    let signer = Signer::load_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    (signer, public_pem)
}

fn test_settings() -> AppSettings {
    let path = std::env::temp_dir().join(format!("provisioning_flow_settings_{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{"DeviceId":"EDGE-FLOW-0001","OwnerId":"owner-flow","UpstreamUrl":"https://ncb.example","SenderReceiverSet":{"NCBIP":"0.0.0.0"}}"#,
    )
    .unwrap();
    AppSettings::load(&path).unwrap()
}

fn test_context(signer: Signer) -> ProtocolContext {
    let identity = DeviceIdentity {
        device_id: "EDGE-FLOW-0001".to_string(),
        owner_id: "owner-flow".to_string(),
        upstream_url: "https://ncb.example".to_string(),
    };
    ProtocolContext {
        identity,
        signer: Arc::new(signer),
        wifi: Arc::new(WifiStateManager::new(
            Arc::new(ScanCache::new()),
            Arc::new(Mutex::new(test_settings())),
            DeviceIdentity {
                device_id: "EDGE-FLOW-0001".to_string(),
                owner_id: "owner-flow".to_string(),
                upstream_url: "https://ncb.example".to_string(),
            },
        )),
        settings: Arc::new(Mutex::new(test_settings())),
    }
}

#[tokio::test]
async fn read_device_id_response_carries_a_verifiable_signature() {
    let (signer, public_pem) = generate_test_keypair();
    let ctx = test_context(signer);

    let request = ProvisionRequest {
        msg_id: "m-1".to_string(),
        time: None,
        msg_type: MSG_READ_DEVICE_ID,
        data: None,
    };
    let response_line = protocol::handle_json(&ctx, &request).await;
    let response: serde_json::Value = serde_json::from_str(&response_line).unwrap();

    assert_eq!(response["Success"], true);
    assert_eq!(response["Data"], "EDGE-FLOW-0001");

    let sign = response["Sign"].as_str().expect("response missing Sign field");
    assert!(crypto::verify("EDGE-FLOW-0001", sign, &public_pem).unwrap());
}

#[tokio::test]
async fn unsupported_message_type_is_rejected_without_touching_crypto_or_wifi() {
    let (signer, _public_pem) = generate_test_keypair();
    let ctx = test_context(signer);

    let request = ProvisionRequest {
        msg_id: "m-2".to_string(),
        time: None,
        msg_type: 99999,
        data: None,
    };
    let response_line = protocol::handle_json(&ctx, &request).await;
    let response: serde_json::Value = serde_json::from_str(&response_line).unwrap();

    assert_eq!(response["Success"], false);
}

#[tokio::test]
async fn provision_wifi_with_malformed_ciphertext_fails_cleanly() {
    let (signer, _public_pem) = generate_test_keypair();
    let ctx = test_context(signer);

    let request = ProvisionRequest {
        msg_id: "m-3".to_string(),
        time: None,
        msg_type: protocol::MSG_PROVISION_WIFI,
        data: Some("not-valid-base64-ciphertext!!".to_string()),
    };
    let response_line = protocol::handle_json(&ctx, &request).await;
    let response: serde_json::Value = serde_json::from_str(&response_line).unwrap();

    assert_eq!(response["Success"], false);
    assert!(response.get("Data").is_none());
}

#[test]
fn debug_dialect_and_json_dispatch_are_distinguished_by_braces() {
    assert!(protocol::looks_like_json("{\"MsgId\":\"m1\"}"));
    assert!(!protocol::looks_like_json("PING"));
}
