use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `data.items[0].id` into keys and indices. Empty segments are dropped.
pub(crate) fn parse_value_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.').map(str::trim).filter(|part| !part.is_empty()) {
        let (key, rest) = match part.find('[') {
            Some(index) => (&part[..index], &part[index..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(PathSegment::Key(key.to_string()));
        }
        for index in rest
            .split(['[', ']'])
            .map(str::trim)
            .filter(|index| !index.is_empty())
        {
            match index.parse::<usize>() {
                Ok(position) => segments.push(PathSegment::Index(position)),
                Err(_) => segments.push(PathSegment::Key(
                    index.trim_matches(['"', '\'']).to_string(),
                )),
            }
        }
    }
    segments
}

pub(crate) fn read_value_path<'a>(target: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = target;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(entries)) => entries.get(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            (PathSegment::Index(index), Value::Object(entries)) => {
                entries.get(&index.to_string())?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod value_path_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_value_path_handles_keys_and_indices() {
        assert_eq!(
            parse_value_path("data.items[1].id"),
            vec![
                PathSegment::Key("data".to_string()),
                PathSegment::Key("items".to_string()),
                PathSegment::Index(1),
                PathSegment::Key("id".to_string()),
            ]
        );
        assert_eq!(
            parse_value_path("[0]['name']"),
            vec![PathSegment::Index(0), PathSegment::Key("name".to_string())]
        );
        assert!(parse_value_path(" . ").is_empty());
    }

    #[test]
    fn read_value_path_walks_nested_json() {
        let body = json!({ "data": { "items": [{ "id": 7 }, { "id": 9 }] } });
        assert_eq!(
            read_value_path(&body, &parse_value_path("data.items[1].id")),
            Some(&json!(9))
        );
        assert_eq!(read_value_path(&body, &parse_value_path("data.missing")), None);
        assert_eq!(read_value_path(&body, &[]), Some(&body));
    }
}
