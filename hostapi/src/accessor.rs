//! Key- and index-based access to composite host values.
//!
//! Function members are returned bound to the value they were read from,
//! because the handle handed to the guest no longer remembers where the
//! function came from.

use crate::error::HostError;
use crate::types::MAX_ARRAY_LEN;
use crate::value::HostValue;

/// Read `target[key]`.
pub fn get_property(target: &HostValue, key: &str) -> Result<HostValue, HostError> {
    let out = match target {
        HostValue::Absent => {
            return Err(HostError::NullDereference {
                key: key.to_string(),
            })
        }
        HostValue::Object(obj) => obj.get(key),
        HostValue::Array(arr) => match key {
            "length" => HostValue::Number(arr.len() as f64),
            _ => match key.parse::<usize>() {
                Ok(i) => arr.get(i),
                Err(_) => HostValue::Absent,
            },
        },
        HostValue::Element(el) => match key {
            "tagName" => HostValue::from(el.tag()),
            _ => el.props().get(key),
        },
        HostValue::Text(s) if key == "length" => HostValue::Number(s.len() as f64),
        HostValue::Text(_) | HostValue::Number(_) | HostValue::Function(_) => HostValue::Absent,
    };
    Ok(bind_member(target, out))
}

/// Write `target[key] = value`.
pub fn set_property(target: &HostValue, key: &str, value: HostValue) -> Result<(), HostError> {
    match target {
        HostValue::Absent => Err(HostError::NullDereference {
            key: key.to_string(),
        }),
        HostValue::Object(obj) => {
            obj.set(key, value);
            Ok(())
        }
        HostValue::Array(arr) => match key.parse::<usize>() {
            Ok(i) => arr.set(i, value),
            Err(_) => Err(HostError::type_mismatch("index key", "text")),
        },
        HostValue::Element(el) => {
            if key == "tagName" {
                return Err(HostError::type_mismatch("writable property", "tagName"));
            }
            el.props().set(key, value);
            Ok(())
        }
        other => Err(HostError::type_mismatch("object", other.kind())),
    }
}

/// Read `target[index]`.
pub fn get_index(target: &HostValue, index: u64) -> Result<HostValue, HostError> {
    match target {
        HostValue::Array(arr) => {
            let out = usize::try_from(index)
                .map(|i| arr.get(i))
                .unwrap_or(HostValue::Absent);
            Ok(bind_member(target, out))
        }
        _ => get_property(target, &index.to_string()),
    }
}

/// Write `target[index] = value`.
pub fn set_index(target: &HostValue, index: u64, value: HostValue) -> Result<(), HostError> {
    match target {
        HostValue::Array(arr) => {
            let i = usize::try_from(index).map_err(|_| HostError::IndexOutOfRange {
                index,
                limit: MAX_ARRAY_LEN,
            })?;
            arr.set(i, value)
        }
        _ => set_property(target, &index.to_string(), value),
    }
}

fn bind_member(owner: &HostValue, member: HostValue) -> HostValue {
    match member {
        HostValue::Function(f) => HostValue::Function(f.bind(owner.clone())),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionRef;
    use crate::value::{ArrayRef, ElementRef, ObjectRef};

    #[test]
    fn test_object_get_set() {
        let obj = HostValue::object();
        set_property(&obj, "count", HostValue::from(3)).unwrap();
        assert_eq!(get_property(&obj, "count").unwrap(), HostValue::from(3));
        assert!(get_property(&obj, "missing").unwrap().is_absent());
    }

    #[test]
    fn test_consecutive_gets_equal() {
        let obj = ObjectRef::new();
        obj.set("f", FunctionRef::native("f", |_, _, _| Ok(HostValue::Absent)).into());
        obj.set("n", HostValue::from(1));
        let target = HostValue::from(obj);
        for key in ["f", "n"] {
            assert_eq!(
                get_property(&target, key).unwrap(),
                get_property(&target, key).unwrap()
            );
        }
    }

    #[test]
    fn test_function_member_bound_to_owner() {
        let obj = ObjectRef::new();
        obj.set("f", FunctionRef::native("f", |_, _, _| Ok(HostValue::Absent)).into());
        let target = HostValue::from(obj);
        let member = get_property(&target, "f").unwrap();
        assert_eq!(member.as_function().unwrap().receiver(), target);
    }

    #[test]
    fn test_array_access() {
        let arr = HostValue::from(ArrayRef::new());
        set_index(&arr, 1, HostValue::from("b")).unwrap();
        assert_eq!(get_property(&arr, "length").unwrap(), HostValue::from(2));
        assert!(get_index(&arr, 0).unwrap().is_absent());
        assert_eq!(get_index(&arr, 1).unwrap(), HostValue::from("b"));
        assert_eq!(get_property(&arr, "1").unwrap(), HostValue::from("b"));
    }

    #[test]
    fn test_huge_index_rejected() {
        let arr = HostValue::array();
        for index in [u32::MAX as u64, u64::MAX, MAX_ARRAY_LEN as u64] {
            let err = set_index(&arr, index, HostValue::from(1)).unwrap_err();
            assert!(matches!(err, HostError::IndexOutOfRange { .. }));
        }
        let err = set_property(&arr, "4294967295", HostValue::from(1)).unwrap_err();
        assert!(matches!(err, HostError::IndexOutOfRange { .. }));
        assert_eq!(get_property(&arr, "length").unwrap(), HostValue::from(0));
    }

    #[test]
    fn test_object_index_uses_string_key() {
        let obj = HostValue::object();
        set_index(&obj, 4, HostValue::from(9)).unwrap();
        assert_eq!(get_property(&obj, "4").unwrap(), HostValue::from(9));
    }

    #[test]
    fn test_element_properties() {
        let el = HostValue::from(ElementRef::new("button"));
        set_property(&el, "textContent", HostValue::from("Click")).unwrap();
        assert_eq!(get_property(&el, "textContent").unwrap(), HostValue::from("Click"));
        assert_eq!(get_property(&el, "tagName").unwrap(), HostValue::from("button"));
        assert!(set_property(&el, "tagName", HostValue::from("div")).is_err());
    }

    #[test]
    fn test_absent_dereference() {
        let err = get_property(&HostValue::Absent, "x").unwrap_err();
        assert_eq!(err, HostError::NullDereference { key: "x".into() });
        assert!(set_index(&HostValue::Absent, 0, HostValue::from(1)).is_err());
    }

    #[test]
    fn test_primitive_targets() {
        assert!(get_property(&HostValue::from(1), "x").unwrap().is_absent());
        assert_eq!(
            get_property(&HostValue::from("héllo"), "length").unwrap(),
            HostValue::from(6)
        );
        assert!(matches!(
            set_property(&HostValue::from(1), "x", HostValue::from(2)),
            Err(HostError::TypeMismatch { .. })
        ));
    }
}
