use std::mem::MaybeUninit;

use anyhow::{Context, Result};
use approx::assert_abs_diff_eq;
use executorch_bridge::sys::{self, Tag};
use executorch_bridge::{BoxedI64List, BoxedOptionalTensorList, BoxedTensorList, EValue, Tensor, TensorImpl, Value};

#[test]
fn scalar_variants_read_back() {
    assert_eq!(EValue::none().tag(), Tag::None);
    assert_eq!(EValue::from_i64(42).view().as_i64(), Some(42));
    assert_eq!(EValue::from_i64(i64::MIN).view().as_i64(), Some(i64::MIN));
    match EValue::from_f64(-0.125).view().value() {
        Value::Double(v) => assert_eq!(v.to_bits(), (-0.125f64).to_bits()),
        other => panic!("unexpected {:?}", other),
    }
    match EValue::from_bool(false).view().value() {
        Value::Bool(v) => assert!(!v),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn list_variants_read_back() {
    let doubles = [1.5, -2.25];
    let value = EValue::from_f64_list(&doubles);
    assert_eq!(value.tag(), Tag::ListDouble);
    match value.view().value() {
        Value::ListDouble(values) => {
            assert_eq!(values.len(), 2);
            assert_eq!(values[0].to_bits(), 1.5f64.to_bits());
            assert_eq!(values[1].to_bits(), (-2.25f64).to_bits());
        }
        other => panic!("unexpected {:?}", other),
    }

    let empty: [bool; 0] = [];
    match EValue::from_bool_list(&empty).view().value() {
        Value::ListBool(values) => assert!(values.is_empty()),
        other => panic!("unexpected {:?}", other),
    }

    let text = String::from("hello, executor");
    match EValue::from_string(&text).view().value() {
        Value::String(bytes) => assert_eq!(bytes, text.as_bytes()),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn int_list_sees_updated_elements() {
    let first = EValue::from_i64(3);
    let second = EValue::from_i64(-4);
    let third = EValue::from_i64(5);
    let list = BoxedI64List::new(&[&first, &second, &third]);
    assert_eq!(list.len(), 3);
    assert!(!list.is_empty());
    let value = EValue::from_i64_list(&list);
    assert_eq!(value.tag(), Tag::ListInt);
    match value.view().value() {
        Value::ListInt(ints) => assert_eq!(ints, &[3, -4, 5]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn tensor_lists_read_back() -> Result<()> {
    let mut a = [1.0f64, 2.0];
    let mut b = [0.5f64];
    let mut a_impl = TensorImpl::from_slice(&[2], &mut a)?;
    let mut b_impl = TensorImpl::from_slice(&[1], &mut b)?;
    let a_tensor = Tensor::new(&mut a_impl);
    let b_tensor = Tensor::new(&mut b_impl);
    let a_value = EValue::from_tensor(&a_tensor);
    let b_value = EValue::from_tensor(&b_tensor);

    let list = BoxedTensorList::new(&[&a_value, &b_value]);
    let value = EValue::from_tensor_list(&list);
    match value.view().value() {
        Value::ListTensor(tensors) => {
            assert_eq!(tensors.len(), 2);
            assert_eq!(tensors[0].sizes(), &[2]);
            assert_abs_diff_eq!(tensors[1].as_slice::<f64>()?[0], 0.5);
        }
        other => panic!("unexpected {:?}", other),
    }

    let optional = BoxedOptionalTensorList::new(&[None, Some(&b_value)]);
    let value = EValue::from_optional_tensor_list(&optional);
    match value.view().value() {
        Value::ListOptionalTensor(tensors) => {
            assert!(tensors[0].is_none());
            let tensor = tensors[1].context("second entry is absent")?;
            assert_eq!(tensor.scalar_type(), sys::ScalarType::Double);
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn clone_keeps_source_intact() -> Result<()> {
    let mut data = [7i32, 8, 9];
    let mut tensor_impl = TensorImpl::from_slice(&[3], &mut data)?;
    let tensor = Tensor::new(&mut tensor_impl);
    let value = EValue::from_tensor(&tensor);
    let copy = value.clone();
    let original = value.view().as_tensor().context("not a tensor")?;
    let cloned = copy.view().as_tensor().context("not a tensor")?;
    assert_eq!(original.as_ptr(), cloned.as_ptr());
    assert_eq!(cloned.as_slice::<i32>()?, &[7, 8, 9]);
    Ok(())
}

#[test]
fn sys_copy_and_move() {
    let mut src = MaybeUninit::<sys::EValueStorage>::uninit();
    let mut copy = MaybeUninit::<sys::EValueStorage>::uninit();
    let mut moved = MaybeUninit::<sys::EValueStorage>::uninit();
    let src = sys::EValueRefMut::from_ptr(src.as_mut_ptr());
    let copy = sys::EValueRefMut::from_ptr(copy.as_mut_ptr());
    let moved = sys::EValueRefMut::from_ptr(moved.as_mut_ptr());
    unsafe {
        sys::executorch_EValue_new_from_f64(src, 6.5);
        sys::executorch_EValue_copy(src.as_ref(), copy);
        sys::executorch_EValue_move(src, moved);
        assert_eq!(sys::executorch_EValue_tag(src.as_ref()), Tag::None);
        assert_eq!(sys::executorch_EValue_as_f64(copy.as_ref()).to_bits(), 6.5f64.to_bits());
        assert_eq!(sys::executorch_EValue_as_f64(moved.as_ref()).to_bits(), 6.5f64.to_bits());
        for value in [src, copy, moved] {
            sys::executorch_EValue_destructor(value);
        }
    }
}
