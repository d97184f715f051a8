//! Minimal `multipart/form-data` reader for single-file uploads.

use anyhow::{anyhow, Result};

/// One part of a form body, borrowing its bytes from the request body.
#[derive(Debug, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

/// Extract the boundary parameter from a `Content-Type` header value.
pub fn boundary(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';').map(str::trim);
    let mime = params.next().unwrap_or_default();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(anyhow!("expected multipart/form-data, got '{}'", mime));
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("multipart boundary missing"))
}

pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut closing = b"\r\n".to_vec();
    closing.extend_from_slice(&delimiter);

    let mut cursor = find(body, &delimiter, 0)
        .ok_or_else(|| anyhow!("multipart body has no boundary"))?
        + delimiter.len();

    let mut parts = Vec::new();
    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart boundary line"));
        }
        cursor += 2;

        let header_end = find(body, b"\r\n\r\n", cursor)
            .ok_or_else(|| anyhow!("multipart part headers are not terminated"))?;
        let headers = std::str::from_utf8(&body[cursor..header_end])
            .map_err(|_| anyhow!("multipart part headers are not UTF-8"))?;
        let data_start = header_end + 4;
        let data_end = find(body, &closing, data_start)
            .ok_or_else(|| anyhow!("multipart part is not terminated"))?;

        parts.push(part_from_headers(headers, &body[data_start..data_end]));
        cursor = data_end + closing.len();
    }
}

fn part_from_headers<'a>(headers: &str, data: &'a [u8]) -> Part<'a> {
    let mut part = Part {
        name: None,
        filename: None,
        content_type: None,
        data,
    };
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                if let Some((k, v)) = param.trim().split_once('=') {
                    let v = v.trim().trim_matches('"').to_string();
                    match k.trim() {
                        "name" => part.name = Some(v),
                        "filename" => part.filename = Some(v),
                        _ => {}
                    }
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.trim().to_string());
        }
    }
    part
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_boundary_parameter() {
        assert_eq!(
            boundary("multipart/form-data; boundary=\"abc123\"").unwrap(),
            "abc123"
        );
        assert!(boundary("application/json").is_err());
        assert!(boundary("multipart/form-data").is_err());
    }

    #[test]
    fn splits_parts_with_binary_payload() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--XyZ\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n");
        body.extend_from_slice(
            b"--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"pitch.mov\"\r\nContent-Type: video/quicktime\r\n\r\n",
        );
        body.extend_from_slice(&[0, 1, 2, b'\r', b'\n', 255]);
        body.extend_from_slice(b"\r\n--XyZ--\r\n");

        let parts = parse(&body, "XyZ").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name.as_deref(), Some("note"));
        assert_eq!(parts[0].data, b"hello");
        assert_eq!(parts[1].filename.as_deref(), Some("pitch.mov"));
        assert_eq!(parts[1].content_type.as_deref(), Some("video/quicktime"));
        assert_eq!(parts[1].data, &[0, 1, 2, b'\r', b'\n', 255]);
    }

    #[test]
    fn unterminated_body_is_rejected() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\ndata";
        assert!(parse(body, "XyZ").is_err());
    }
}
