//! # Feature: Image Generation
//!
//! Text-to-image through a local ComfyUI server. A job is a node graph
//! (checkpoint load → prompt encode → sample → decode → save) queued over
//! HTTP; completion is announced on a WebSocket shared by every job of this
//! client, so the caller waits for the `executed` event carrying its own
//! `prompt_id` and ignores the rest.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.1.0: Subscribe before queueing so fast jobs cannot complete unseen
//! - 1.0.0: Initial SDXL workflow

use super::{BackendDescriptor, BackendKind, GeneratedImage, ImageBackend};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8188";

pub const QUALITY_TAGS: &str = "masterpiece, best quality, very awa, newest, recent,";
pub const NEGATIVE_TAGS: &str = "worst quality, worst displeasing, bad anatomy, mosaic censoring, censored, \
bar censor, watermark, username, signature, twitter username, closed eyes, chibi, deformed,";

/// Sampler and canvas settings for the SDXL workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParams {
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg")]
    pub cfg: f64,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
}

fn default_checkpoint() -> String {
    "noobaiXLNAIXL_vPred10Version.safetensors".to_string()
}

fn default_width() -> u32 {
    1024
}

fn default_height() -> u32 {
    1536
}

fn default_steps() -> u32 {
    50
}

fn default_cfg() -> f64 {
    0.6
}

fn default_sampler() -> String {
    "euler_cfg_pp".to_string()
}

fn default_scheduler() -> String {
    "beta".to_string()
}

fn default_filename_prefix() -> String {
    "ComfyUI_DiscordBot".to_string()
}

impl Default for WorkflowParams {
    fn default() -> Self {
        WorkflowParams {
            checkpoint: default_checkpoint(),
            width: default_width(),
            height: default_height(),
            steps: default_steps(),
            cfg: default_cfg(),
            sampler: default_sampler(),
            scheduler: default_scheduler(),
            filename_prefix: default_filename_prefix(),
        }
    }
}

/// Prepends the standard tags to the user's prompts
pub fn decorate_prompts(positive: &str, negative: &str) -> (String, String) {
    let positive = format!("{QUALITY_TAGS} {}", positive.trim());
    let negative = if negative.trim().is_empty() {
        NEGATIVE_TAGS.to_string()
    } else {
        format!("{NEGATIVE_TAGS} {}", negative.trim())
    };
    (positive, negative)
}

fn sdxl_encoder(params: &WorkflowParams, text: &str) -> Value {
    json!({
        "class_type": "CLIPTextEncodeSDXL",
        "inputs": {
            "width": params.width, "height": params.height, "crop_w": 0, "crop_h": 0,
            "target_width": params.width, "target_height": params.height,
            "text_g": text, "text_l": text,
            "clip": ["4", 1]
        }
    })
}

/// The SDXL node graph. Node ids are strings; `["4", 1]` means output 1 of node 4.
pub fn build_workflow(params: &WorkflowParams, positive: &str, negative: &str, seed: u64) -> Value {
    json!({
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": {"ckpt_name": params.checkpoint}
        },
        "6": sdxl_encoder(params, positive),
        "7": sdxl_encoder(params, negative),
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": {"width": params.width, "height": params.height, "batch_size": 1}
        },
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": seed,
                "steps": params.steps, "cfg": params.cfg,
                "sampler_name": params.sampler, "scheduler": params.scheduler,
                "denoise": 1.0,
                "model": ["4", 0], "positive": ["6", 0], "negative": ["7", 0], "latent_image": ["5", 0]
            }
        },
        "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": params.filename_prefix, "images": ["8", 0]}}
    })
}

/// Reference to an image the server saved
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct ServerEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Output images if `text` is the `executed` event for `prompt_id`
pub fn match_executed(text: &str, prompt_id: &str) -> Option<Vec<OutputImage>> {
    let event: ServerEvent = serde_json::from_str(text).ok()?;
    if event.kind != "executed" || event.data.get("prompt_id")?.as_str()? != prompt_id {
        return None;
    }
    let images = event
        .data
        .get("output")
        .and_then(|o| o.get("images"))
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    Some(serde_json::from_value(images).unwrap_or_default())
}

pub struct ComfyUiBackend {
    descriptor: BackendDescriptor,
    client: reqwest::Client,
    server_address: String,
    client_id: String,
    params: WorkflowParams,
}

impl ComfyUiBackend {
    pub fn new(client: reqwest::Client, server_address: &str, params: WorkflowParams) -> Self {
        ComfyUiBackend {
            descriptor: BackendDescriptor {
                name: "comfyui".to_string(),
                endpoint: format!("http://{server_address}"),
                kind: BackendKind::LocalImageGen,
            },
            client,
            server_address: server_address.to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            params,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn queue_prompt(&self, workflow: &Value) -> Result<String> {
        let response = self
            .client
            .post(format!("http://{}/prompt", self.server_address))
            .json(&json!({ "prompt": workflow, "client_id": self.client_id }))
            .send()
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RelayError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let queued: QueueResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Decode(e.to_string()))?;
        Ok(queued.prompt_id)
    }

    async fn fetch_image(&self, image: &OutputImage) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("http://{}/view", self.server_address))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.folder_type.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Backend {
                status: status.as_u16(),
                message: format!("image download failed for {}", image.filename),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageBackend for ComfyUiBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn generate(&self, positive: &str, negative: &str) -> Result<GeneratedImage> {
        let (positive, negative) = decorate_prompts(positive, negative);
        let seed: u64 = rand::random();
        let workflow = build_workflow(&self.params, &positive, &negative, seed);

        let ws_url = format!("ws://{}/ws?clientId={}", self.server_address, self.client_id);
        let (mut socket, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        let prompt_id = self.queue_prompt(&workflow).await?;
        info!("Queued ComfyUI job {prompt_id} (seed {seed})");

        let images = loop {
            let frame = match socket.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(RelayError::Connection(e.to_string())),
                None => {
                    return Err(RelayError::Connection(
                        "websocket closed before the job finished".to_string(),
                    ))
                }
            };
            match frame {
                WsMessage::Text(text) => {
                    if let Some(images) = match_executed(&text, &prompt_id) {
                        break images;
                    }
                }
                WsMessage::Close(_) => {
                    return Err(RelayError::Connection(
                        "websocket closed before the job finished".to_string(),
                    ))
                }
                // Binary frames are live previews
                _ => {}
            }
        };
        let _ = socket.close(None).await;

        let first = images.into_iter().next().ok_or_else(|| RelayError::Backend {
            status: 200,
            message: "no image data received from ComfyUI".to_string(),
        })?;
        debug!("Fetching {} from ComfyUI", first.filename);

        let bytes = self.fetch_image(&first).await?;
        Ok(GeneratedImage {
            filename: first.filename,
            bytes,
        })
    }
}
