// tests/http_clients.rs
// Real HTTP clients against axum mock upstreams on 127.0.0.1:0.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use report_monitor::analyze::chat::{ChatMessage, ChatRequest, ChatTransport};
use report_monitor::analyze::types::{Classification, Impact, Sentiment};
use report_monitor::analyze::ZChatClient;
use report_monitor::ingest::stockbit::StockbitClient;
use report_monitor::notify::sheets::{ServiceAccountKey, SheetsClient, HEADER_ROW};
use report_monitor::notify::telegram::TelegramNotifier;
use report_monitor::{
    AlertChannel, ClassifiedReport, ClassifyError, ReportRecord, ReportSource, ReportStore,
    SinkError, SourceError,
};

const TEST_PEM: &str = include_str!("fixtures/test_service_account.pem");

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// ---- Stockbit feed ----

#[tokio::test]
async fn stockbit_client_sends_auth_and_query_and_maps_items() {
    let app = Router::new().route(
        "/stream/v3",
        get(
            |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                if bearer(&headers) != "Bearer sb-token" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"message": "no"})));
                }
                assert_eq!(q.get("category").map(String::as_str), Some("STREAM_CATEGORY_REPORTS"));
                assert_eq!(q.get("limit").map(String::as_str), Some("25"));
                (
                    StatusCode::OK,
                    Json(json!({
                        "data": {"stream": [
                            {
                                "stream_id": 501,
                                "title": "Public expose",
                                "created_at": "2024-03-01 09:15:00",
                                "topics": ["TLKM"],
                                "reports": [{"type": "Public Expose"}],
                                "title_url": "post/501"
                            },
                            {"stream_id": 502, "title": "No extras"}
                        ]}
                    })),
                )
            },
        ),
    );
    let base = serve(app).await;
    let client = StockbitClient::new(format!("{base}/stream/v3"), "sb-token").unwrap();

    let got = client.fetch_reports(25, &CancellationToken::new()).await.unwrap();

    assert_eq!(got.len(), 2);
    assert_eq!(got[0].stream_id, 501);
    assert_eq!(got[0].report_type, "Public Expose");
    assert_eq!(got[0].stock, "TLKM");
    assert_eq!(got[0].url.as_deref(), Some("https://stockbit.com/post/501"));
    assert_eq!(got[1].report_type, "Unknown");
}

#[tokio::test]
async fn stockbit_non_2xx_is_unavailable() {
    let app = Router::new().route(
        "/stream/v3",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance window") }),
    );
    let base = serve(app).await;
    let client = StockbitClient::new(format!("{base}/stream/v3"), "t").unwrap();

    let err = client
        .fetch_reports(50, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SourceError::Unavailable { status, excerpt } => {
            assert_eq!(status, 503);
            assert_eq!(excerpt, "maintenance window");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn stockbit_garbage_body_is_decode_error() {
    let app = Router::new().route("/stream/v3", get(|| async { "<html>login</html>" }));
    let base = serve(app).await;
    let client = StockbitClient::new(format!("{base}/stream/v3"), "t").unwrap();

    let err = client
        .fetch_reports(50, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Decode(_)));
}

#[tokio::test]
async fn stockbit_respects_cancellation() {
    let client = StockbitClient::new("http://127.0.0.1:9/stream/v3", "t").unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client.fetch_reports(50, &cancel).await.unwrap_err();
    assert!(matches!(err, SourceError::Cancelled));
}

// ---- Classifier transport ----

fn chat_request() -> ChatRequest {
    ChatRequest {
        model: "glm-4.7".into(),
        messages: vec![ChatMessage::system("sys"), ChatMessage::user("classify")],
        temperature: 0.3,
        stream: false,
        timeout: std::time::Duration::from_secs(5),
    }
}

#[tokio::test]
async fn zchat_returns_first_choice_content() {
    let seen: Arc<Mutex<Option<Value>>> = Arc::default();
    let app = Router::new()
        .route(
            "/chat",
            post(
                |State(seen): State<Arc<Mutex<Option<Value>>>>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    assert_eq!(bearer(&headers), "Bearer z-key");
                    *seen.lock() = Some(body);
                    Json(json!({"choices": [{"message": {"role": "assistant", "content": "{\"impact\":\"low\"}"}}]}))
                },
            ),
        )
        .with_state(seen.clone());
    let base = serve(app).await;
    let client = ZChatClient::new(format!("{base}/chat"), "z-key").unwrap();

    let content = client.complete(&chat_request()).await.unwrap();

    assert_eq!(content, r#"{"impact":"low"}"#);
    let body = seen.lock().clone().unwrap();
    assert_eq!(body["model"], "glm-4.7");
    assert_eq!(body["stream"], false);
    assert_eq!(body["messages"][1]["role"], "user");
    assert!(body.get("timeout").is_none());
}

#[tokio::test]
async fn zchat_429_is_rate_limited_and_5xx_is_http() {
    let app = Router::new()
        .route("/busy", post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }))
        .route("/down", post(|| async { (StatusCode::BAD_GATEWAY, "bad gateway") }));
    let base = serve(app).await;

    let busy = ZChatClient::new(format!("{base}/busy"), "k").unwrap();
    assert_eq!(
        busy.complete(&chat_request()).await.unwrap_err(),
        ClassifyError::RateLimited
    );

    let down = ZChatClient::new(format!("{base}/down"), "k").unwrap();
    assert_eq!(
        down.complete(&chat_request()).await.unwrap_err(),
        ClassifyError::Http {
            status: 502,
            excerpt: "bad gateway".into()
        }
    );
}

// ---- Telegram ----

#[tokio::test]
async fn telegram_posts_markdown_message() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let app = Router::new()
        .route(
            "/botTKN/sendMessage",
            post(
                |State(seen): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                    seen.lock().push(body);
                    Json(json!({"ok": true}))
                },
            ),
        )
        .with_state(seen.clone());
    let base = serve(app).await;
    let tg = TelegramNotifier::new(format!("{base}/"), "TKN", "-100123");

    tg.send_text("*hello*").await.unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["chat_id"], "-100123");
    assert_eq!(seen[0]["text"], "*hello*");
    assert_eq!(seen[0]["parse_mode"], "Markdown");
    assert_eq!(seen[0]["disable_web_page_preview"], true);
}

#[tokio::test]
async fn telegram_error_status_is_sink_error() {
    let app = Router::new().route(
        "/botTKN/sendMessage",
        post(|| async { (StatusCode::BAD_REQUEST, r#"{"ok":false,"description":"chat not found"}"#) }),
    );
    let base = serve(app).await;
    let tg = TelegramNotifier::new(base, "TKN", "1");

    let err = tg.send_text("x").await.unwrap_err();
    match err {
        SinkError::Http { status, excerpt } => {
            assert_eq!(status, 400);
            assert!(excerpt.contains("chat not found"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn telegram_transport_error_hides_bot_token() {
    // Grab a free port, then close it so the connect is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let tg = TelegramNotifier::new(format!("http://{addr}"), "123456:SECRET-BOT-TOKEN", "1");

    let err = tg.send_text("x").await.unwrap_err();

    assert!(matches!(err, SinkError::Transport(_)));
    let shown = format!("{err} {err:?}");
    assert!(!shown.contains("SECRET-BOT-TOKEN"), "{shown}");
}

// ---- Google Sheets ----

#[derive(Default)]
struct SheetLog {
    token_forms: Vec<HashMap<String, String>>,
    gets: Vec<String>,
    appends: Vec<(String, Value)>,
    header_present: bool,
}

type SharedLog = Arc<Mutex<SheetLog>>;

fn sheets_app(log: SharedLog) -> Router {
    Router::new()
        .route(
            "/token",
            post(
                |State(log): State<SharedLog>,
                 axum::Form(form): axum::Form<HashMap<String, String>>| async move {
                    log.lock().token_forms.push(form);
                    Json(json!({"access_token": "ya29.test", "expires_in": 3600, "token_type": "Bearer"}))
                },
            ),
        )
        .route(
            "/v4/spreadsheets/{id}/values/{range}",
            get(
                |State(log): State<SharedLog>,
                 Path((id, range)): Path<(String, String)>,
                 headers: HeaderMap| async move {
                    assert_eq!(id, "sheet-123");
                    assert_eq!(bearer(&headers), "Bearer ya29.test");
                    let mut log = log.lock();
                    log.gets.push(range.clone());
                    if log.header_present {
                        Json(json!({"range": range, "values": [["Timestamp"]]}))
                    } else {
                        Json(json!({"range": range}))
                    }
                },
            )
            .post(
                |State(log): State<SharedLog>,
                 Path((_id, range)): Path<(String, String)>,
                 Query(q): Query<HashMap<String, String>>,
                 Json(body): Json<Value>| async move {
                    assert_eq!(q.get("valueInputOption").map(String::as_str), Some("RAW"));
                    log.lock().appends.push((range, body));
                    Json(json!({"updates": {}}))
                },
            ),
        )
        .with_state(log)
}

fn sheets_client(base: &str) -> SheetsClient {
    let key = ServiceAccountKey {
        client_email: "monitor@test-project.iam.gserviceaccount.com".into(),
        private_key: TEST_PEM.into(),
        token_uri: format!("{base}/token"),
    };
    SheetsClient::new(key, "sheet-123", "Sheet1", "Stockbit")
        .unwrap()
        .with_base_url(base)
}

fn classified(id: u64) -> ClassifiedReport {
    ClassifiedReport::new(
        ReportRecord {
            stream_id: id,
            title: format!("Report {id}"),
            report_type: "Financial Report".into(),
            stock: "BBNI".into(),
            timestamp: "2024-03-01 10:00:00".into(),
            url: None,
        },
        Classification {
            impact: Impact::High,
            sentiment: Sentiment::Negative,
            reasoning: "loss".into(),
            keywords: vec!["loss".into(), "impairment".into()],
        },
    )
}

#[tokio::test]
async fn sheets_writes_header_once_then_rows() {
    let log: SharedLog = Arc::default();
    let base = serve(sheets_app(log.clone())).await;
    let client = sheets_client(&base);

    let written = client
        .append_reports(&[classified(1), classified(2)])
        .await
        .unwrap();
    assert_eq!(written, 2);

    {
        let log = log.lock();
        assert_eq!(log.token_forms.len(), 1);
        let form = &log.token_forms[0];
        assert_eq!(
            form.get("grant_type").map(String::as_str),
            Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
        );
        assert_eq!(form.get("assertion").map(|a| a.split('.').count()), Some(3));

        assert_eq!(log.gets, vec!["Sheet1!A1:J1".to_string()]);
        assert_eq!(log.appends.len(), 2);
        assert_eq!(log.appends[0].0, "Sheet1!A1:append");
        assert_eq!(log.appends[0].1["values"][0].as_array().unwrap().len(), HEADER_ROW.len());
        assert_eq!(log.appends[0].1["values"][0][0], "Timestamp");
        assert_eq!(log.appends[1].0, "Sheet1!A2:append");
        let rows = log.appends[1].1["values"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], 1);
        assert_eq!(rows[1][5], "high");
        assert_eq!(rows[1][8], "loss, impairment");
    }

    log.lock().header_present = true;
    client.append_reports(&[classified(3)]).await.unwrap();
    let log = log.lock();
    assert_eq!(log.appends.len(), 3);
    assert_eq!(log.appends[2].0, "Sheet1!A2:append");
}

#[tokio::test]
async fn sheets_empty_batch_makes_no_requests() {
    let log: SharedLog = Arc::default();
    let base = serve(sheets_app(log.clone())).await;

    assert_eq!(sheets_client(&base).append_reports(&[]).await.unwrap(), 0);
    assert!(log.lock().token_forms.is_empty());
}

#[tokio::test]
async fn sheets_rejected_token_is_auth_error() {
    let app = Router::new().route(
        "/token",
        post(|| async { (StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#) }),
    );
    let base = serve(app).await;

    let err = sheets_client(&base)
        .append_reports(&[classified(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Auth(msg) if msg.contains("invalid_grant")));
}
