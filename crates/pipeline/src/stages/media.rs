//! Media externalization.
//!
//! Message elements carrying inline media above the size threshold get
//! the bytes written to media storage and the part replaced with a file
//! reference. Storage failures emit an error element; the message is
//! forwarded with its inline data intact.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::{ElementPayload, StreamElement};
use arena_domain::message::ContentPart;

use crate::{forward, next_element, MediaStorage, Stage};

pub struct MediaExternalizer {
    storage: Arc<dyn MediaStorage>,
    threshold: usize,
}

impl MediaExternalizer {
    pub fn new(storage: Arc<dyn MediaStorage>, threshold: usize) -> Self {
        Self { storage, threshold }
    }
}

#[async_trait]
impl Stage for MediaExternalizer {
    fn name(&self) -> &'static str {
        "media_externalizer"
    }

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    ) {
        while let Some(mut element) = next_element(&mut input, &cancel).await {
            let mut failure: Option<String> = None;

            if let ElementPayload::Message { message } = &mut element.payload {
                if let Some(parts) = &mut message.parts {
                    for part in parts.iter_mut() {
                        let ContentPart::Media {
                            media_type,
                            data,
                            path,
                            size_bytes,
                            sha256,
                        } = part
                        else {
                            continue;
                        };
                        let Some(bytes) = data else { continue };
                        if bytes.len() <= self.threshold {
                            continue;
                        }
                        match self.storage.write(media_type, bytes) {
                            Ok(stored) => {
                                *path = Some(stored.path);
                                *size_bytes = Some(stored.size_bytes);
                                *sha256 = Some(stored.sha256);
                                *data = None;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "media externalization failed");
                                failure = Some(format!("pipeline: media externalization: {e}"));
                            }
                        }
                    }
                }
            }

            if let Some(message) = failure {
                if !forward(&output, &cancel, StreamElement::error(message)).await {
                    return;
                }
            }
            if !forward(&output, &cancel, element).await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoredMedia;
    use arena_domain::error::{Error, Result};
    use arena_domain::message::Message;
    use parking_lot::Mutex;

    struct RecordingStorage {
        writes: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl MediaStorage for RecordingStorage {
        fn write(&self, _media_type: &str, data: &[u8]) -> Result<StoredMedia> {
            if self.fail {
                return Err(Error::Other("disk full".into()));
            }
            self.writes.lock().push(data.len());
            Ok(StoredMedia {
                path: format!("media/blob-{}", data.len()),
                sha256: "ab".repeat(32),
                size_bytes: data.len(),
            })
        }
    }

    fn message_with_media(size: usize) -> Message {
        let mut message = Message::assistant("with media");
        message.parts = Some(vec![
            ContentPart::Text {
                text: "caption".into(),
            },
            ContentPart::Media {
                media_type: "audio/pcm".into(),
                data: Some(vec![0u8; size]),
                path: None,
                size_bytes: None,
                sha256: None,
            },
        ]);
        message
    }

    #[tokio::test]
    async fn externalizes_only_above_threshold() {
        let storage = Arc::new(RecordingStorage {
            writes: Mutex::new(Vec::new()),
            fail: false,
        });
        let (tx, rx) = mpsc::channel(8);
        let mut out = crate::Pipeline::builder()
            .stage(MediaExternalizer::new(storage.clone(), 100))
            .build()
            .execute(CancellationToken::new(), rx);

        tx.send(StreamElement::message(message_with_media(500)))
            .await
            .unwrap();
        tx.send(StreamElement::message(message_with_media(50)))
            .await
            .unwrap();
        drop(tx);

        let big = out.recv().await.unwrap();
        let ElementPayload::Message { message } = big.payload else {
            panic!("expected message");
        };
        let ContentPart::Media { data, path, .. } = &message.parts.unwrap()[1] else {
            panic!("expected media part");
        };
        assert!(data.is_none());
        assert_eq!(path.as_deref(), Some("media/blob-500"));

        let small = out.recv().await.unwrap();
        let ElementPayload::Message { message } = small.payload else {
            panic!("expected message");
        };
        let ContentPart::Media { data, path, .. } = &message.parts.unwrap()[1] else {
            panic!("expected media part");
        };
        assert!(data.is_some());
        assert!(path.is_none());

        assert_eq!(storage.writes.lock().clone(), vec![500]);
    }

    #[tokio::test]
    async fn storage_failure_keeps_inline_data_and_emits_error() {
        let storage = Arc::new(RecordingStorage {
            writes: Mutex::new(Vec::new()),
            fail: true,
        });
        let (tx, rx) = mpsc::channel(8);
        let mut out = crate::Pipeline::builder()
            .stage(MediaExternalizer::new(storage, 100))
            .build()
            .execute(CancellationToken::new(), rx);

        tx.send(StreamElement::message(message_with_media(500)))
            .await
            .unwrap();
        drop(tx);

        let error = out.recv().await.unwrap();
        assert!(error.is_error());
        let element = out.recv().await.unwrap();
        let ElementPayload::Message { message } = element.payload else {
            panic!("expected message");
        };
        let ContentPart::Media { data, .. } = &message.parts.unwrap()[1] else {
            panic!("expected media part");
        };
        assert!(data.is_some(), "inline bytes survive a storage failure");
    }
}
