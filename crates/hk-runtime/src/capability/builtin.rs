use std::io::{Read, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use hk_core::HostCallError;
use serde_json::{json, Value};
use url::Url;

use super::{HostServices, ModuleHandle, ModuleOrigin};
use crate::helpers::args::{arg_opt_str, arg_str, arg_text};
use crate::transport::transport_native;

const PATH_SHIM: &str = include_str!("../js/modules/path.js");
const URL_SHIM: &str = include_str!("../js/modules/url.js");
const UTIL_SHIM: &str = include_str!("../js/modules/util.js");
const STREAM_SHIM: &str = include_str!("../js/modules/stream.js");
const HTTP_SHIM: &str = include_str!("../js/modules/http.js");
const PUNYCODE_SHIM: &str = include_str!("../js/modules/punycode.js");
const ZLIB_SHIM: &str = include_str!("../js/modules/zlib.js");

pub(super) fn modules(collection_root: &Path, services: &HostServices) -> Vec<ModuleHandle> {
    vec![
        path_module(collection_root),
        url_module(),
        ModuleHandle::new("util", ModuleOrigin::Builtin).with_source(UTIL_SHIM),
        ModuleHandle::new("stream", ModuleOrigin::Builtin).with_source(STREAM_SHIM),
        http_module("http", services),
        http_module("https", services),
        punycode_module(),
        zlib_module(),
    ]
}

/// POSIX `path.normalize` semantics.
pub(crate) fn normalize_posix(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let mut normalized = segments.join("/");
    if normalized.is_empty() && !absolute {
        normalized.push('.');
    }
    if trailing && !segments.is_empty() {
        normalized.push('/');
    }
    if absolute {
        format!("/{}", normalized)
    } else {
        normalized
    }
}

fn trim_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

pub(crate) fn join_posix(parts: &[String]) -> String {
    let joined = parts
        .iter()
        .filter(|part| !part.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("/");
    normalize_posix(&joined)
}

pub(crate) fn resolve_posix(cwd: &str, parts: &[String]) -> String {
    let mut resolved = String::new();
    for part in parts.iter().map(String::as_str).rev().chain(std::iter::once(cwd)) {
        if part.is_empty() {
            continue;
        }
        resolved = if resolved.is_empty() {
            part.to_string()
        } else {
            format!("{}/{}", part, resolved)
        };
        if part.starts_with('/') {
            break;
        }
    }
    trim_trailing_slashes(&normalize_posix(&resolved)).to_string()
}

pub(crate) fn dirname_posix(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = trim_trailing_slashes(path);
    match trimmed.rfind('/') {
        None => ".".to_string(),
        Some(0) => "/".to_string(),
        Some(index) => trim_trailing_slashes(&trimmed[..index]).to_string(),
    }
}

pub(crate) fn basename_posix(path: &str, extension: Option<&str>) -> String {
    let trimmed = trim_trailing_slashes(path);
    if trimmed == "/" {
        return String::new();
    }
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match extension {
        Some(extension) if base != extension && base.ends_with(extension) => {
            base[..base.len() - extension.len()].to_string()
        }
        _ => base.to_string(),
    }
}

pub(crate) fn extname_posix(path: &str) -> String {
    let base = basename_posix(path, None);
    match base.rfind('.') {
        Some(index) if index > 0 => base[index..].to_string(),
        _ => String::new(),
    }
}

pub(crate) fn relative_posix(cwd: &str, from: &str, to: &str) -> String {
    let from = resolve_posix(cwd, &[from.to_string()]);
    let to = resolve_posix(cwd, &[to.to_string()]);
    let from_segments = from.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>();
    let to_segments = to.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>();
    let common = from_segments
        .iter()
        .zip(&to_segments)
        .take_while(|(left, right)| left == right)
        .count();
    let mut relative = vec![".."; from_segments.len() - common];
    relative.extend(&to_segments[common..]);
    relative.join("/")
}

fn string_args(args: &[Value]) -> Vec<String> {
    args.iter()
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect()
}

fn path_module(collection_root: &Path) -> ModuleHandle {
    let cwd = collection_root.to_string_lossy().into_owned();
    let resolve_cwd = cwd.clone();
    let relative_cwd = cwd;
    ModuleHandle::new("path", ModuleOrigin::Builtin)
        .with_source(PATH_SHIM)
        .with_constant("sep", json!("/"))
        .with_constant("delimiter", json!(":"))
        .with_native("join", |args| Ok(json!(join_posix(&string_args(args)))))
        .with_native("resolve", move |args| {
            Ok(json!(resolve_posix(&resolve_cwd, &string_args(args))))
        })
        .with_native("normalize", |args| {
            Ok(json!(normalize_posix(arg_str("normalize", args, 0)?)))
        })
        .with_native("dirname", |args| Ok(json!(dirname_posix(arg_str("dirname", args, 0)?))))
        .with_native("basename", |args| {
            Ok(json!(basename_posix(arg_str("basename", args, 0)?, arg_opt_str(args, 1))))
        })
        .with_native("extname", |args| Ok(json!(extname_posix(arg_str("extname", args, 0)?))))
        .with_native("isAbsolute", |args| {
            Ok(json!(arg_str("isAbsolute", args, 0)?.starts_with('/')))
        })
        .with_native("relative", move |args| {
            Ok(json!(relative_posix(
                &relative_cwd,
                arg_str("relative", args, 0)?,
                arg_str("relative", args, 1)?
            )))
        })
}

pub(crate) fn url_components(url: &Url) -> Value {
    let auth = match (url.username(), url.password()) {
        ("", None) => Value::Null,
        (user, None) => json!(user),
        (user, Some(password)) => json!(format!("{}:{}", user, password)),
    };
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    json!({
        "href": url.as_str(),
        "protocol": format!("{}:", url.scheme()),
        "username": url.username(),
        "password": url.password().unwrap_or(""),
        "auth": auth,
        "host": host,
        "hostname": url.host_str().unwrap_or(""),
        "port": url.port().map(|port| port.to_string()).unwrap_or_default(),
        "pathname": url.path(),
        "search": url.query().map(|query| format!("?{}", query)).unwrap_or_default(),
        "hash": url.fragment().map(|fragment| format!("#{}", fragment)).unwrap_or_default(),
        "origin": url.origin().ascii_serialization(),
    })
}

fn parse_url(input: &str, base: Option<&str>) -> Result<Url, HostCallError> {
    let parsed = match base {
        Some(base) => Url::parse(base).and_then(|base| base.join(input)),
        None => Url::parse(input),
    };
    parsed.map_err(|error| HostCallError::invalid("URL", format!("Invalid URL '{}': {}", input, error)))
}

fn url_module() -> ModuleHandle {
    ModuleHandle::new("url", ModuleOrigin::Builtin)
        .with_source(URL_SHIM)
        .with_native("parse", |args| {
            let input = arg_str("parse", args, 0)?;
            let base = arg_opt_str(args, 1);
            parse_url(input, base).map(|url| url_components(&url))
        })
        .with_native("canParse", |args| {
            let input = arg_str("canParse", args, 0)?;
            Ok(json!(parse_url(input, arg_opt_str(args, 1)).is_ok()))
        })
        .with_native("resolve", |args| {
            let from = arg_str("resolve", args, 0)?;
            let to = arg_str("resolve", args, 1)?;
            parse_url(to, Some(from)).map(|url| json!(url.as_str()))
        })
}

fn http_module(name: &'static str, services: &HostServices) -> ModuleHandle {
    ModuleHandle::new(name, ModuleOrigin::Builtin)
        .with_source(HTTP_SHIM)
        .with_constant("defaultProtocol", json!(format!("{}:", name)))
        .with_shared_native("send", transport_native(name, services.http.clone()))
}

fn punycode_module() -> ModuleHandle {
    ModuleHandle::new("punycode", ModuleOrigin::Builtin)
        .with_source(PUNYCODE_SHIM)
        .with_native("toASCII", |args| {
            let domain = arg_str("toASCII", args, 0)?;
            idna::domain_to_ascii(domain)
                .map(Value::String)
                .map_err(|error| HostCallError::failed(format!("toASCII failed for '{}': {:?}", domain, error)))
        })
        .with_native("toUnicode", |args| {
            let (unicode, _) = idna::domain_to_unicode(arg_str("toUnicode", args, 0)?);
            Ok(Value::String(unicode))
        })
        .with_native("encode", |args| {
            let input = arg_str("encode", args, 0)?;
            idna::punycode::encode_str(input)
                .map(Value::String)
                .ok_or_else(|| HostCallError::failed(format!("cannot punycode-encode '{}'", input)))
        })
        .with_native("decode", |args| {
            let input = arg_str("decode", args, 0)?;
            idna::punycode::decode_to_string(input)
                .map(Value::String)
                .ok_or_else(|| HostCallError::failed(format!("invalid punycode input '{}'", input)))
        })
}

pub(crate) fn decode_base64(function: &str, input: &str) -> Result<Vec<u8>, HostCallError> {
    STANDARD
        .decode(input.trim())
        .map_err(|error| HostCallError::invalid(function, format!("invalid base64: {}", error)))
}

fn compress(kind: &str, input: &[u8]) -> std::io::Result<Vec<u8>> {
    if kind == "gzip" {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(input)?;
        encoder.finish()
    } else {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(input)?;
        encoder.finish()
    }
}

fn decompress(kind: &str, input: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::new();
    if kind == "gzip" {
        GzDecoder::new(input).read_to_end(&mut output)?;
    } else {
        DeflateDecoder::new(input).read_to_end(&mut output)?;
    }
    Ok(output)
}

/// Buffers cross the bridge as base64 strings.
fn zlib_module() -> ModuleHandle {
    ModuleHandle::new("zlib", ModuleOrigin::Builtin)
        .with_source(ZLIB_SHIM)
        .with_native("compress", |args| {
            let kind = arg_str("compress", args, 0)?;
            let input = decode_base64("compress", arg_str("compress", args, 1)?)?;
            compress(kind, &input)
                .map(|bytes| json!(STANDARD.encode(bytes)))
                .map_err(|error| HostCallError::failed(format!("{} failed: {}", kind, error)))
        })
        .with_native("decompress", |args| {
            let kind = arg_str("decompress", args, 0)?;
            let input = decode_base64("decompress", arg_str("decompress", args, 1)?)?;
            decompress(kind, &input)
                .map(|bytes| json!(STANDARD.encode(bytes)))
                .map_err(|error| HostCallError::failed(format!("incorrect {} data: {}", kind, error)))
        })
        .with_native("utf8ToBase64", |args| Ok(json!(STANDARD.encode(arg_text(args, 0)))))
        .with_native("base64ToUtf8", |args| {
            let bytes = decode_base64("base64ToUtf8", &arg_text(args, 0))?;
            Ok(json!(String::from_utf8_lossy(&bytes)))
        })
}

#[cfg(test)]
mod builtin_tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn posix_path_helpers_follow_node_semantics() {
        assert_eq!(normalize_posix("/a//b/../c/."), "/a/c");
        assert_eq!(normalize_posix("a/../../b/"), "../b/");
        assert_eq!(normalize_posix(""), ".");
        assert_eq!(join_posix(&strings(&["/a", "b", "../c.txt"])), "/a/c.txt");
        assert_eq!(join_posix(&strings(&["", ""])), ".");
        assert_eq!(resolve_posix("/col", &strings(&["lib", "x.js"])), "/col/lib/x.js");
        assert_eq!(resolve_posix("/col", &strings(&["/etc", "hosts"])), "/etc/hosts");
        assert_eq!(dirname_posix("/a/b/c.txt"), "/a/b");
        assert_eq!(dirname_posix("c.txt"), ".");
        assert_eq!(dirname_posix("/c.txt"), "/");
        assert_eq!(basename_posix("/a/b/c.txt", Some(".txt")), "c");
        assert_eq!(basename_posix("/a/b/", None), "b");
        assert_eq!(extname_posix("archive.tar.gz"), ".gz");
        assert_eq!(extname_posix(".bashrc"), "");
        assert_eq!(relative_posix("/", "/data/a/b", "/data/c"), "../../c");
    }

    #[test]
    fn url_components_match_the_node_shape() {
        let url = Url::parse("https://user:pw@api.test:8443/v1/items?q=1#top").expect("valid url");
        let parts = url_components(&url);
        assert_eq!(parts["protocol"], json!("https:"));
        assert_eq!(parts["host"], json!("api.test:8443"));
        assert_eq!(parts["port"], json!("8443"));
        assert_eq!(parts["pathname"], json!("/v1/items"));
        assert_eq!(parts["search"], json!("?q=1"));
        assert_eq!(parts["hash"], json!("#top"));
        assert_eq!(parts["auth"], json!("user:pw"));
    }

    #[test]
    fn url_resolve_and_punycode_natives() {
        let url = url_module();
        assert_eq!(
            url.call("resolve", &[json!("https://a.test/x/y"), json!("../z")]),
            Ok(json!("https://a.test/z"))
        );
        assert!(url.call("parse", &[json!("not a url")]).is_err());

        let punycode = punycode_module();
        assert_eq!(
            punycode.call("toASCII", &[json!("mañana.com")]),
            Ok(json!("xn--maana-pta.com"))
        );
        assert_eq!(
            punycode.call("toUnicode", &[json!("xn--maana-pta.com")]),
            Ok(json!("mañana.com"))
        );
        assert_eq!(punycode.call("encode", &[json!("mañana")]), Ok(json!("maana-pta")));
        assert_eq!(punycode.call("decode", &[json!("maana-pta")]), Ok(json!("mañana")));
    }

    #[test]
    fn zlib_natives_round_trip_through_base64() {
        let zlib = zlib_module();
        let encoded = zlib
            .call("utf8ToBase64", &[json!("hello hello hello")])
            .expect("encode");
        for kind in ["gzip", "deflate"] {
            let compressed = zlib
                .call("compress", &[json!(kind), encoded.clone()])
                .expect("compress");
            let restored = zlib
                .call("decompress", &[json!(kind), compressed])
                .expect("decompress");
            assert_eq!(
                zlib.call("base64ToUtf8", &[restored]),
                Ok(json!("hello hello hello"))
            );
        }
        assert!(zlib.call("decompress", &[json!("gzip"), encoded]).is_err());
    }
}
