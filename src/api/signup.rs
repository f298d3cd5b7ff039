use crate::api::error::AppError;
use crate::api::AppState;
use crate::infrastructure::repository;
use crate::infrastructure::rewriter::TrackerUrls;
use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct RegisterUserResponse {
    pub user_id: String,
}

/// `POST /v1/signup/user`: mint a fresh opaque user token.
pub async fn register_user(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RegisterUserResponse>), AppError> {
    let user_id = Uuid::new_v4().simple().to_string();
    let user = repository::upsert_user(&state.ctx.pool, &user_id).await?;

    tracing::info!("Registered new user {}", user.id);
    Ok((
        StatusCode::CREATED,
        Json(RegisterUserResponse { user_id: user.id }),
    ))
}

#[derive(Deserialize)]
pub struct ProcessOpmlParams {
    pub user_id: Option<String>,
}

/// `POST /v1/signup/process_opml`: return the uploaded OPML with every RSS
/// outline's `xmlUrl` pointed at this proxy.
pub async fn process_opml(
    State(state): State<AppState>,
    Query(params): Query<ProcessOpmlParams>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let user_id = match params.user_id {
        Some(user_id) => user_id,
        None => Uuid::new_v4().simple().to_string(),
    };
    repository::upsert_user(&state.ctx.pool, &user_id).await?;

    let mut opml_text = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        let text = field.text().await.map_err(bad_upload)?;
        opml_text = Some(text);
        break;
    }
    let Some(opml_text) = opml_text else {
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, "Missing OPML upload").into_response());
    };

    match rewrite_opml(&opml_text, &state.urls, &user_id) {
        Ok(rewritten) => {
            Ok(([(header::CONTENT_TYPE, "application/xml")], rewritten).into_response())
        }
        Err(err) => {
            tracing::debug!("Rejecting unparseable OPML upload: {}", err);
            Ok((StatusCode::UNPROCESSABLE_ENTITY, "Invalid OPML document").into_response())
        }
    }
}

fn bad_upload(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Feed(crate::domain::feed_service::FeedServiceError::InvalidUrl(
        err.to_string(),
    ))
}

/// Rewrite every `<outline type="rss" xmlUrl="...">` to go through the proxy.
/// Other outlines and all structure pass through untouched.
fn rewrite_opml(
    opml: &str,
    urls: &TrackerUrls,
    user_id: &str,
) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(opml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(element)) if element.name().as_ref() == b"outline" => {
                writer.write_event(Event::Start(rewrite_outline(&element, urls, user_id)?))?;
            }
            Ok(Event::Empty(element)) if element.name().as_ref() == b"outline" => {
                writer.write_event(Event::Empty(rewrite_outline(&element, urls, user_id)?))?;
            }
            Ok(event) => writer.write_event(event)?,
            Err(err) => return Err(err),
        }
        buf.clear();
    }

    // Input arrived as &str and only UTF-8 was written back
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

fn rewrite_outline<'a>(
    element: &quick_xml::events::BytesStart<'a>,
    urls: &TrackerUrls,
    user_id: &str,
) -> Result<quick_xml::events::BytesStart<'static>, quick_xml::Error> {
    let mut is_rss = false;
    let mut xml_url = None;

    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        match attr.key.as_ref() {
            b"type" => is_rss = attr.value.as_ref() == b"rss",
            b"xmlUrl" => {
                xml_url = Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned())
            }
            _ => {}
        }
    }

    let mut rewritten = quick_xml::events::BytesStart::new("outline");
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if is_rss && attr.key.as_ref() == b"xmlUrl" {
            let original = xml_url.as_deref().unwrap_or_default();
            rewritten.push_attribute((
                "xmlUrl",
                urls.user_feed_url(user_id, original).as_str(),
            ));
        } else {
            rewritten.push_attribute((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned().as_str(),
                String::from_utf8_lossy(attr.value.as_ref()).into_owned().as_str(),
            ));
        }
    }

    Ok(rewritten)
}
