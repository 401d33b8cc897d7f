use bytes::{Bytes, BytesMut};
use cow_utils::CowUtils;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::RscError;
use crate::rsc::rendering::html::escape_attribute;

const BODY_CLOSE: &str = "</body>";

/// Splits `source` into two copies. The first is bounded by `capacity`; the
/// second buffers without limit, so a reader that only starts on it after
/// draining part of the first cannot stall the split.
pub fn tee_stream<S>(
    source: S,
    capacity: usize,
) -> (
    impl Stream<Item = Result<Bytes, RscError>> + Send + 'static,
    impl Stream<Item = Result<Bytes, RscError>> + Send + 'static,
)
where
    S: Stream<Item = Result<Bytes, RscError>> + Send + 'static,
{
    let (first_tx, first_rx) = mpsc::channel(capacity.max(1));
    let (second_tx, second_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut source = Box::pin(source);
        let mut first = Some(first_tx);
        let mut second = Some(second_tx);

        while let Some(item) = source.next().await {
            if let Some(tx) = &first
                && tx.send(item.clone()).await.is_err()
            {
                trace!("First tee reader dropped");
                first = None;
            }
            if let Some(tx) = &second
                && tx.send(item).is_err()
            {
                trace!("Second tee reader dropped");
                second = None;
            }
            if first.is_none() && second.is_none() {
                break;
            }
        }
    });

    let first = async_stream::stream! {
        let mut receiver = first_rx;
        while let Some(item) = receiver.recv().await {
            yield item;
        }
    };
    let second = async_stream::stream! {
        let mut receiver = second_rx;
        while let Some(item) = receiver.recv().await {
            yield item;
        }
    };

    (first, second)
}

/// Wraps wire rows in a script that appends them to `self.__RSC_PAYLOAD`.
pub fn payload_script(rows: &str, nonce: Option<&str>) -> Result<String, RscError> {
    let literal = serde_json::to_string(rows)?;
    let literal = literal.cow_replace("</", "<\\/").cow_replace("<!--", "<\\!--").into_owned();
    let open = match nonce {
        Some(nonce) => format!("<script nonce=\"{}\">", escape_attribute(nonce)),
        None => "<script>".to_string(),
    };
    Ok(format!("{open}(self.__RSC_PAYLOAD||=[]).push({literal})</script>"))
}

/// Takes the longest valid UTF-8 prefix out of `buffer`, leaving a split
/// trailing character for the next chunk.
fn take_utf8(buffer: &mut BytesMut) -> Result<Option<String>, RscError> {
    let valid = match std::str::from_utf8(buffer) {
        Ok(text) => text.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(e) => return Err(e.into()),
    };

    if valid == 0 {
        return Ok(None);
    }

    let chunk = buffer.split_to(valid);
    Ok(Some(String::from_utf8(chunk.to_vec()).map_err(|e| e.utf8_error())?))
}

/// Holds back everything from the last `</body>` so later chunks land
/// inside the body.
fn split_trailer(html: String, trailer: &mut String) -> String {
    if !trailer.is_empty() {
        return html;
    }
    match html.rfind(BODY_CLOSE) {
        Some(index) => {
            let mut html = html;
            *trailer = html.split_off(index);
            html
        }
        None => html,
    }
}

enum Next {
    Html(Option<Result<String, RscError>>),
    Payload(Option<Result<Bytes, RscError>>),
}

/// Interleaves wire rows into an HTML stream as inline scripts. The first
/// HTML chunk (the shell) is always emitted first; rows that arrive earlier
/// are buffered. The document trailer is emitted last.
pub fn inject_rsc_payload<H, P>(
    html: H,
    payload: P,
    nonce: Option<String>,
) -> impl Stream<Item = Result<Bytes, RscError>> + Send
where
    H: Stream<Item = Result<String, RscError>> + Send + 'static,
    P: Stream<Item = Result<Bytes, RscError>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut html = Box::pin(html);
        let mut payload = Box::pin(payload);
        let mut pending = BytesMut::new();
        let mut buffered: Vec<String> = Vec::new();
        let mut trailer = String::new();
        let mut shell_sent = false;
        let mut html_open = true;
        let mut payload_open = true;

        while html_open || payload_open {
            let next = tokio::select! {
                chunk = html.next(), if html_open => Next::Html(chunk),
                chunk = payload.next(), if payload_open => Next::Payload(chunk),
            };

            match next {
                Next::Html(Some(chunk)) => {
                    yield Bytes::from(split_trailer(chunk?, &mut trailer));
                    if !shell_sent && !buffered.is_empty() {
                        debug!("Flushing {} payload chunks held behind the shell", buffered.len());
                        yield Bytes::from(payload_script(&buffered.concat(), nonce.as_deref())?);
                        buffered.clear();
                    }
                    shell_sent = true;
                }
                Next::Html(None) => {
                    html_open = false;
                    shell_sent = true;
                }
                Next::Payload(Some(chunk)) => {
                    pending.extend_from_slice(&chunk?);
                    if let Some(rows) = take_utf8(&mut pending)? {
                        if shell_sent {
                            yield Bytes::from(payload_script(&rows, nonce.as_deref())?);
                        } else {
                            buffered.push(rows);
                        }
                    }
                }
                Next::Payload(None) => payload_open = false,
            }
        }

        if !buffered.is_empty() {
            yield Bytes::from(payload_script(&buffered.concat(), nonce.as_deref())?);
        }

        if !pending.is_empty() {
            Err::<(), RscError>(RscError::decoding("Payload ended inside a UTF-8 sequence".to_string()))?;
        }

        if !trailer.is_empty() {
            yield Bytes::from(trailer);
        }
    }
}
