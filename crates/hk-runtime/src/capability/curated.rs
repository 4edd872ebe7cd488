use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hk_core::HostCallError;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::Rng;
use roxmltree::{Document, Node};
use scraper::{Html, Selector};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use uuid::Uuid;

use super::builtin::decode_base64;
use super::{HostServices, ModuleHandle, ModuleOrigin};
use crate::helpers::args::{arg, arg_str, arg_text, arg_u64};
use crate::transport::transport_native;

const AJV_SHIM: &str = include_str!("../js/modules/ajv.js");
const AJV_FORMATS_SHIM: &str = include_str!("../js/modules/ajv-formats.js");
const TV4_SHIM: &str = include_str!("../js/modules/tv4.js");
const LODASH_SHIM: &str = include_str!("../js/modules/lodash.js");
const ATOB_SHIM: &str = include_str!("../js/modules/atob.js");
const BTOA_SHIM: &str = include_str!("../js/modules/btoa.js");
const MOMENT_SHIM: &str = include_str!("../js/modules/moment.js");
const UUID_SHIM: &str = include_str!("../js/modules/uuid.js");
const NANOID_SHIM: &str = include_str!("../js/modules/nanoid.js");
const AXIOS_SHIM: &str = include_str!("../js/modules/axios.js");
const NODE_FETCH_SHIM: &str = include_str!("../js/modules/node-fetch.js");
const CHAI_SHIM: &str = include_str!("../js/modules/chai.js");
const CRYPTO_JS_SHIM: &str = include_str!("../js/modules/crypto-js.js");
const XML2JS_SHIM: &str = include_str!("../js/modules/xml2js.js");
const CHEERIO_SHIM: &str = include_str!("../js/modules/cheerio.js");
const NODE_VAULT_SHIM: &str = include_str!("../js/modules/node-vault.js");

const NANOID_ALPHABET: &[u8] = b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

pub(super) fn modules(services: &HostServices) -> Vec<ModuleHandle> {
    vec![
        schema_module("ajv", AJV_SHIM),
        ModuleHandle::new("ajv-formats", ModuleOrigin::Curated).with_source(AJV_FORMATS_SHIM),
        schema_module("tv4", TV4_SHIM),
        ModuleHandle::new("lodash", ModuleOrigin::Curated).with_source(LODASH_SHIM),
        ModuleHandle::new("atob", ModuleOrigin::Curated)
            .with_source(ATOB_SHIM)
            .with_native("decode", |args| atob(&arg_text(args, 0))),
        ModuleHandle::new("btoa", ModuleOrigin::Curated)
            .with_source(BTOA_SHIM)
            .with_native("encode", |args| btoa(&arg_text(args, 0))),
        ModuleHandle::new("moment", ModuleOrigin::Curated).with_source(MOMENT_SHIM),
        ModuleHandle::new("uuid", ModuleOrigin::Curated)
            .with_source(UUID_SHIM)
            .with_native("v4", |_| Ok(json!(Uuid::new_v4().to_string())))
            .with_native("validate", |args| {
                let candidate = arg_text(args, 0);
                Ok(json!(candidate.len() == 36 && Uuid::parse_str(&candidate).is_ok()))
            }),
        ModuleHandle::new("nanoid", ModuleOrigin::Curated)
            .with_source(NANOID_SHIM)
            .with_native("nanoid", |args| Ok(json!(nanoid(arg_u64(args, 0).unwrap_or(21) as usize)))),
        http_client("axios", AXIOS_SHIM, services),
        http_client("node-fetch", NODE_FETCH_SHIM, services),
        ModuleHandle::new("chai", ModuleOrigin::Curated).with_source(CHAI_SHIM),
        crypto_module(),
        ModuleHandle::new("xml2js", ModuleOrigin::Curated)
            .with_source(XML2JS_SHIM)
            .with_native("parse", |args| {
                xml_to_value(arg_str("parse", args, 0)?, &XmlOptions::from_value(arg(args, 1)))
            }),
        ModuleHandle::new("cheerio", ModuleOrigin::Curated)
            .with_source(CHEERIO_SHIM)
            .with_native("select", |args| {
                select_html(arg_str("select", args, 0)?, arg_str("select", args, 1)?)
            })
            .with_native("text", |args| {
                let document = Html::parse_document(arg_str("text", args, 0)?);
                Ok(json!(document.root_element().text().collect::<String>()))
            }),
        http_client("node-vault", NODE_VAULT_SHIM, services),
    ]
}

fn http_client(name: &'static str, source: &'static str, services: &HostServices) -> ModuleHandle {
    ModuleHandle::new(name, ModuleOrigin::Curated)
        .with_source(source)
        .with_shared_native("send", transport_native(name, services.http.clone()))
}

fn schema_module(name: &'static str, source: &'static str) -> ModuleHandle {
    ModuleHandle::new(name, ModuleOrigin::Curated)
        .with_source(source)
        .with_native("validate", |args| validate_schema(arg(args, 0), arg(args, 1)))
}

pub(crate) fn validate_schema(schema: &Value, instance: &Value) -> Result<Value, HostCallError> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|error| HostCallError::failed(format!("schema is invalid: {}", error)))?;
    let errors = match compiled.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|error| {
                json!({
                    "instancePath": error.instance_path.to_string(),
                    "message": error.to_string(),
                })
            })
            .collect(),
    };
    Ok(json!({ "valid": errors.is_empty(), "errors": errors }))
}

fn atob(input: &str) -> Result<Value, HostCallError> {
    let bytes = decode_base64("atob", input)?;
    Ok(json!(bytes.iter().map(|byte| char::from(*byte)).collect::<String>()))
}

fn btoa(input: &str) -> Result<Value, HostCallError> {
    let bytes = input
        .chars()
        .map(|character| u8::try_from(u32::from(character)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| {
            HostCallError::invalid("btoa", "The string to be encoded contains characters outside of the Latin1 range.")
        })?;
    Ok(json!(STANDARD.encode(bytes)))
}

fn nanoid(size: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..size)
        .map(|_| char::from(NANOID_ALPHABET[rng.gen_range(0..NANOID_ALPHABET.len())]))
        .collect()
}

fn digest_hex<D: Digest>(data: &[u8]) -> String {
    hex::encode(D::digest(data))
}

fn hmac_hex<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<String, HostCallError> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|error| HostCallError::failed(format!("invalid HMAC key: {}", error)))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn hex_arg(function: &str, args: &[Value], index: usize) -> Result<Vec<u8>, HostCallError> {
    hex::decode(arg_str(function, args, index)?)
        .map_err(|error| HostCallError::invalid(function, format!("invalid hex input: {}", error)))
}

fn unsupported(algorithm: &str) -> HostCallError {
    HostCallError::failed(format!("unsupported hash algorithm {}", algorithm))
}

/// Word arrays travel as hex strings; the shim rebuilds the encoders on top.
fn crypto_module() -> ModuleHandle {
    ModuleHandle::new("crypto-js", ModuleOrigin::Curated)
        .with_source(CRYPTO_JS_SHIM)
        .with_native("digest", |args| {
            let algorithm = arg_str("digest", args, 0)?;
            let data = hex_arg("digest", args, 1)?;
            let digest = match algorithm {
                "MD5" => digest_hex::<Md5>(&data),
                "SHA224" => digest_hex::<Sha224>(&data),
                "SHA256" => digest_hex::<Sha256>(&data),
                "SHA384" => digest_hex::<Sha384>(&data),
                "SHA512" => digest_hex::<Sha512>(&data),
                other => return Err(unsupported(other)),
            };
            Ok(json!(digest))
        })
        .with_native("hmac", |args| {
            let algorithm = arg_str("hmac", args, 0)?;
            let data = hex_arg("hmac", args, 1)?;
            let key = hex_arg("hmac", args, 2)?;
            let digest = match algorithm {
                "MD5" => hmac_hex::<Hmac<Md5>>(&key, &data)?,
                "SHA224" => hmac_hex::<Hmac<Sha224>>(&key, &data)?,
                "SHA256" => hmac_hex::<Hmac<Sha256>>(&key, &data)?,
                "SHA384" => hmac_hex::<Hmac<Sha384>>(&key, &data)?,
                "SHA512" => hmac_hex::<Hmac<Sha512>>(&key, &data)?,
                other => return Err(unsupported(other)),
            };
            Ok(json!(digest))
        })
        .with_native("utf8ToHex", |args| Ok(json!(hex::encode(arg_text(args, 0)))))
        .with_native("hexToUtf8", |args| {
            let bytes = hex_arg("hexToUtf8", args, 0)?;
            Ok(json!(String::from_utf8_lossy(&bytes)))
        })
        .with_native("hexToBase64", |args| {
            Ok(json!(STANDARD.encode(hex_arg("hexToBase64", args, 0)?)))
        })
        .with_native("base64ToHex", |args| {
            let bytes = decode_base64("base64ToHex", arg_str("base64ToHex", args, 0)?)?;
            Ok(json!(hex::encode(bytes)))
        })
        .with_native("randomHex", |args| {
            let size = arg_u64(args, 0).unwrap_or(16) as usize;
            let bytes = (0..size).map(|_| rand::random::<u8>()).collect::<Vec<_>>();
            Ok(json!(hex::encode(bytes)))
        })
}

#[derive(Debug, Clone, Copy)]
struct XmlOptions {
    explicit_array: bool,
    explicit_root: bool,
    ignore_attrs: bool,
    merge_attrs: bool,
}

impl XmlOptions {
    fn from_value(options: &Value) -> Self {
        let flag = |name: &str, default: bool| {
            options.get(name).and_then(Value::as_bool).unwrap_or(default)
        };
        Self {
            explicit_array: flag("explicitArray", true),
            explicit_root: flag("explicitRoot", true),
            ignore_attrs: flag("ignoreAttrs", false),
            merge_attrs: flag("mergeAttrs", false),
        }
    }
}

fn qualified_name(node: Node<'_, '_>) -> String {
    let tag = node.tag_name();
    match tag.namespace().and_then(|namespace| node.lookup_prefix(namespace)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, tag.name()),
        _ => tag.name().to_string(),
    }
}

fn insert_child(object: &mut Map<String, Value>, key: String, value: Value, explicit_array: bool) {
    match object.get_mut(&key) {
        Some(Value::Array(items)) if explicit_array => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = match previous {
                Value::Array(mut items) => {
                    items.push(value);
                    Value::Array(items)
                }
                single => Value::Array(vec![single, value]),
            };
        }
        None if explicit_array => {
            object.insert(key, Value::Array(vec![value]));
        }
        None => {
            object.insert(key, value);
        }
    }
}

fn element_value(node: Node<'_, '_>, options: &XmlOptions) -> Value {
    let mut object = Map::new();
    if !options.ignore_attrs {
        let attributes = node
            .attributes()
            .map(|attribute| (attribute.name().to_string(), json!(attribute.value())))
            .collect::<Map<_, _>>();
        if !attributes.is_empty() {
            if options.merge_attrs {
                object.extend(attributes);
            } else {
                object.insert("$".to_string(), Value::Object(attributes));
            }
        }
    }
    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            insert_child(
                &mut object,
                qualified_name(child),
                element_value(child, options),
                options.explicit_array,
            );
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }
    if object.is_empty() {
        return Value::String(text);
    }
    if !text.trim().is_empty() {
        object.insert("_".to_string(), Value::String(text));
    }
    Value::Object(object)
}

fn xml_to_value(xml: &str, options: &XmlOptions) -> Result<Value, HostCallError> {
    let document = Document::parse(xml)
        .map_err(|error| HostCallError::failed(format!("Invalid XML: {}", error)))?;
    let root = document.root_element();
    let value = element_value(root, options);
    if !options.explicit_root {
        return Ok(value);
    }
    let mut wrapped = Map::new();
    wrapped.insert(qualified_name(root), value);
    Ok(Value::Object(wrapped))
}

fn select_html(html: &str, selector: &str) -> Result<Value, HostCallError> {
    let parsed = Selector::parse(selector)
        .map_err(|error| HostCallError::invalid("select", format!("invalid selector '{}': {:?}", selector, error)))?;
    let document = Html::parse_document(html);
    let elements = document
        .select(&parsed)
        .map(|element| {
            let attributes = element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), json!(value)))
                .collect::<Map<_, _>>();
            json!({
                "tag": element.value().name(),
                "text": element.text().collect::<String>(),
                "html": element.inner_html(),
                "outerHtml": element.html(),
                "attrs": attributes,
            })
        })
        .collect::<Vec<_>>();
    Ok(Value::Array(elements))
}

#[cfg(test)]
mod curated_tests {
    use super::*;

    fn call(module: &str, function: &str, args: &[Value]) -> Result<Value, HostCallError> {
        modules(&HostServices::default())
            .into_iter()
            .find(|handle| handle.name() == module)
            .expect("module should exist")
            .call(function, args)
    }

    #[test]
    fn schema_validation_reports_instance_paths() {
        let schema = json!({
            "type": "object",
            "required": ["id"],
            "properties": { "id": { "type": "integer" } }
        });
        let ok = validate_schema(&schema, &json!({ "id": 1 })).expect("validate");
        assert_eq!(ok, json!({ "valid": true, "errors": [] }));
        let bad = validate_schema(&schema, &json!({ "id": "x" })).expect("validate");
        assert_eq!(bad["valid"], json!(false));
        assert_eq!(bad["errors"][0]["instancePath"], json!("/id"));
    }

    #[test]
    fn base64_helpers_use_latin1_strings() {
        assert_eq!(call("btoa", "encode", &[json!("hello")]), Ok(json!("aGVsbG8=")));
        assert_eq!(call("atob", "decode", &[json!("aGVsbG8=")]), Ok(json!("hello")));
        let error = call("btoa", "encode", &[json!("☃")]).expect_err("non latin1");
        assert_eq!(error.error_name(), "TypeError");
    }

    #[test]
    fn id_generators_produce_expected_shapes() {
        let id = call("uuid", "v4", &[]).expect("uuid");
        assert_eq!(call("uuid", "validate", &[id]), Ok(json!(true)));
        assert_eq!(call("uuid", "validate", &[json!("nope")]), Ok(json!(false)));
        let short = call("nanoid", "nanoid", &[json!(10)]).expect("nanoid");
        assert_eq!(short.as_str().map(str::len), Some(10));
    }

    #[test]
    fn crypto_digests_match_known_vectors() {
        let data = call("crypto-js", "utf8ToHex", &[json!("abc")]).expect("hex");
        assert_eq!(
            call("crypto-js", "digest", &[json!("MD5"), data.clone()]),
            Ok(json!("900150983cd24fb0d6963f7d28e17f72"))
        );
        assert_eq!(
            call("crypto-js", "digest", &[json!("SHA256"), data]),
            Ok(json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"))
        );
        let key = call("crypto-js", "utf8ToHex", &[json!("key")]).expect("hex");
        let message = call(
            "crypto-js",
            "utf8ToHex",
            &[json!("The quick brown fox jumps over the lazy dog")],
        )
        .expect("hex");
        assert_eq!(
            call("crypto-js", "hmac", &[json!("SHA256"), message, key]),
            Ok(json!("f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"))
        );
        assert!(call("crypto-js", "digest", &[json!("SHA3"), json!("00")]).is_err());
    }

    #[test]
    fn xml_follows_xml2js_shape() {
        let xml = r#"<order id="7"><item sku="a">Pen</item><item sku="b">Ink</item><note>fragile</note><empty/></order>"#;
        let value = xml_to_value(xml, &XmlOptions::from_value(&Value::Null)).expect("parse");
        assert_eq!(
            value,
            json!({
                "order": {
                    "$": { "id": "7" },
                    "item": [
                        { "$": { "sku": "a" }, "_": "Pen" },
                        { "$": { "sku": "b" }, "_": "Ink" }
                    ],
                    "note": ["fragile"],
                    "empty": [""]
                }
            })
        );
        let flat = xml_to_value(
            "<a><b>1</b></a>",
            &XmlOptions::from_value(&json!({ "explicitArray": false, "explicitRoot": false })),
        )
        .expect("parse");
        assert_eq!(flat, json!({ "b": "1" }));
        assert!(xml_to_value("<a>", &XmlOptions::from_value(&Value::Null)).is_err());
    }

    #[test]
    fn html_selection_returns_text_and_attributes() {
        let html = r#"<ul><li class="x" data-id="1">One</li><li class="x" data-id="2">Two</li></ul>"#;
        let selected = select_html(html, "li.x").expect("select");
        assert_eq!(selected.as_array().map(Vec::len), Some(2));
        assert_eq!(selected[1]["text"], json!("Two"));
        assert_eq!(selected[0]["attrs"]["data-id"], json!("1"));
        assert!(select_html(html, "li[").is_err());
    }
}
