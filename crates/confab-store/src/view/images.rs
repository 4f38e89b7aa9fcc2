// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Image-URL detection for multimodal expansion.
//!
//! A text message qualifies for expansion when it contains HTTP(S) URLs
//! ending in a known image extension.  URLs on placeholder hosts
//! (`example.com`, `localhost`, `.invalid`, `.test`) would fail to fetch
//! and are left as plain text.

use std::sync::OnceLock;

use regex::Regex;

fn image_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s<>"')\]]+\.(?:jpg|jpeg|png|gif|webp|svg)(?:\?[^\s<>"')\]]*)?"#)
            .expect("image URL regex is valid")
    })
}

/// All fetchable image URLs in `text`, in order of appearance.
pub fn extract_image_urls(text: &str) -> Vec<String> {
    image_url_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|url| !host_of(url).map(is_placeholder_host).unwrap_or(true))
        .collect()
}

/// The hostname portion of an HTTP(S) URL, without port.
fn host_of(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("HTTPS://"))
        .or_else(|| url.strip_prefix("HTTP://"))?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority.split(':').next().unwrap_or(authority);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// True for hostnames reserved for documentation and local testing.
fn is_placeholder_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    if host == "localhost" {
        return true;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.iter().any(|l| *l == "example") {
        return true;
    }
    matches!(labels.last(), Some(&"localhost") | Some(&"invalid") | Some(&"test"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
