use crate::params::CompileParams;

/// Builds `"<backend>:sw8:sh8:...:inline:unroll"`. Absent dimensions are
/// omitted; flags follow in fixed order. The `debug` flag changes logging
/// only and is not part of the key.
pub fn fingerprint(backend: &str, params: &CompileParams) -> String {
    let mut key = String::from(backend);
    let shape = &params.shape;
    push_dim(&mut key, "sw", shape.src_w);
    push_dim(&mut key, "sh", shape.src_h);
    push_dim(&mut key, "dw", shape.dst_w);
    push_dim(&mut key, "sx", shape.src_x);
    push_dim(&mut key, "sy", shape.src_y);
    push_dim(&mut key, "dx", shape.dst_x);
    push_dim(&mut key, "dy", shape.dst_y);
    push_dim(&mut key, "w", shape.width);
    push_dim(&mut key, "h", shape.height);
    if params.flags.inline_constants {
        key.push_str(":inline");
    }
    if params.flags.unroll {
        key.push_str(":unroll");
    }
    if params.flags.align_opt {
        key.push_str(":align");
    }
    key
}

fn push_dim(key: &mut String, tag: &str, value: Option<u32>) {
    if let Some(value) = value {
        key.push(':');
        key.push_str(tag);
        key.push_str(&value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{BlitOp, BlitShape, CompilerFlags};

    #[test]
    fn key_is_deterministic_and_tagged() {
        let op = BlitOp {
            src_w: 8,
            src_h: 8,
            dst_w: 8,
            width: 8,
            height: 8,
            ..BlitOp::default()
        };
        let params = CompileParams {
            shape: BlitShape::frozen(&op),
            flags: CompilerFlags {
                unroll: true,
                inline_constants: true,
                ..CompilerFlags::default()
            },
        };
        let key = fingerprint("textual", &params);
        assert_eq!(
            key,
            "textual:sw8:sh8:dw8:sx0:sy0:dx0:dy0:w8:h8:inline:unroll"
        );
        assert_eq!(key, fingerprint("textual", &params));
    }

    #[test]
    fn runtime_variable_dimensions_are_omitted() {
        let params = CompileParams {
            shape: BlitShape {
                width: Some(8),
                height: Some(8),
                ..BlitShape::default()
            },
            flags: CompilerFlags::default(),
        };
        assert_eq!(fingerprint("binary", &params), "binary:w8:h8");
    }

    #[test]
    fn debug_flag_does_not_change_the_key() {
        let mut params = CompileParams::default();
        let plain = fingerprint("textual", &params);
        params.flags.debug = true;
        assert_eq!(plain, fingerprint("textual", &params));
    }
}
