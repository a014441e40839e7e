//! Object library behavior through the public API: interning, hashing,
//! hash table invariants, builders, arrays and dynamic objects.

mod common;

use common::test_context;
use tiro_runtime::{
    value_hash, Array, DynamicObject, Float, HashTable, HashTableIterator, Integer, Scope,
    SmallInt, StringBuilder, TiroString, Tuple, TypedValue, Value,
};

#[test]
fn interning_is_idempotent() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);

    let first = scope.local(ctx.get_interned_string("canonical"));
    let second = scope.local(ctx.get_interned_string("canonical"));
    assert!(first.value().same(second.value()), "content-equal interned strings are one object");
    assert!(first.get().interned());

    // Interning an already interned string is a no-op.
    let third = ctx.intern_string(first.handle());
    assert!(third.value().same(first.value()));
}

#[test]
fn symbols_with_equal_names_are_identical() {
    let mut ctx = test_context();
    let a = ctx.get_symbol("name");
    let b = ctx.get_symbol("name");
    let c = ctx.get_symbol("other");
    assert!(a.value().same(b.value()));
    assert!(!a.value().same(c.value()));
}

#[test]
fn numeric_hashes_agree_across_representations() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);

    for n in [0i64, 1, -1, 5, SmallInt::MAX, SmallInt::MIN, 123_456] {
        let small = SmallInt::make(n).value();
        let heap = scope.local(Integer::make(&mut ctx, n));
        assert_eq!(value_hash(small), value_hash(heap.value()), "integer {n}");

        let float = scope.local(Float::make(&mut ctx, n as f64));
        if (n as f64) as i64 == n {
            assert_eq!(value_hash(small), value_hash(float.value()), "float {n}");
        }
    }
}

#[test]
fn integers_outside_the_small_range_allocate() {
    let mut ctx = test_context();
    assert!(ctx.get_integer(SmallInt::MAX).is_embedded_integer());
    assert!(ctx.get_integer(SmallInt::MIN).is_embedded_integer());
    assert!(!ctx.get_integer(SmallInt::MAX + 1).is_embedded_integer());
    assert!(!ctx.get_integer(SmallInt::MIN - 1).is_embedded_integer());
}

#[test]
fn hash_table_set_get_remove_round_trip() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let table = scope.local(HashTable::make(&mut ctx));

    let key = scope.local(TiroString::make(&mut ctx, "k"));
    let value = scope.local(TiroString::make(&mut ctx, "v"));
    HashTable::set(table.handle(), &mut ctx, key.handle().erased(), value.handle().erased());

    let found = table.get().get(key.value()).expect("present after set");
    assert!(found.same(value.value()));

    // Lookup through a different string object with equal contents.
    let other_key = scope.local(TiroString::make(&mut ctx, "k"));
    assert!(table.get().contains(other_key.value()));

    table.get().remove(key.value());
    assert!(!table.get().contains(key.value()));
    assert_eq!(table.get().len(), 0);
    table.get().check_invariants();
}

#[test]
fn hash_table_grows_through_size_classes() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let table = scope.local(HashTable::make(&mut ctx));

    // 500 entries forces the index from the u8 into the u16 size class.
    for n in 0..500 {
        let key = scope.local(ctx.get_integer(n));
        let value = scope.local(ctx.get_integer(n * 2));
        HashTable::set(table.handle(), &mut ctx, key.handle(), value.handle());
    }
    assert_eq!(table.get().len(), 500);
    table.get().check_invariants();

    for n in (0..500).step_by(7) {
        let key = ctx.get_integer(n);
        let found = table.get().get(key).expect("key present");
        assert!(found.same(ctx.get_integer(n * 2)));
    }
}

#[test]
fn hash_table_compacts_after_heavy_removal() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let table = scope.local(HashTable::make(&mut ctx));

    for n in 0..64 {
        let key = scope.local(ctx.get_integer(n));
        let value = scope.local(ctx.get_integer(-n));
        HashTable::set(table.handle(), &mut ctx, key.handle(), value.handle());
    }
    for n in 0..48 {
        table.get().remove(ctx.get_integer(n));
    }

    // Removing three quarters triggers in-place compaction.
    assert_eq!(table.get().len(), 16);
    assert!(table.get().is_packed());
    table.get().check_invariants();

    // Iteration order is the surviving insertion order.
    let iterator = scope.local(HashTableIterator::make(&mut ctx, table.handle()));
    let mut expected = 48;
    loop {
        let next = scope.local(HashTableIterator::next(iterator.handle(), &mut ctx).unwrap());
        if next.value().same(ctx.get_stop_iteration().value()) {
            break;
        }
        let pair = Tuple::try_from_value(next.value()).expect("key-value tuple");
        assert!(pair.get(0).same(ctx.get_integer(expected)));
        expected += 1;
    }
    assert_eq!(expected, 64);
}

#[test]
fn string_builder_grows_and_finishes_interned() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let builder = scope.local(StringBuilder::make(&mut ctx));

    assert_eq!(builder.get().capacity(), 0);
    StringBuilder::append_str(builder.handle(), &mut ctx, "x");
    assert_eq!(builder.get().capacity(), 64);

    for _ in 0..20 {
        StringBuilder::append_str(builder.handle(), &mut ctx, "0123456789");
    }
    assert_eq!(builder.get().len(), 201);
    assert!(builder.get().capacity() >= 201);
    assert!(builder.get().capacity().is_power_of_two());

    let string = scope.local(StringBuilder::make_string(builder.handle(), &mut ctx));
    assert_eq!(string.get().len(), 201);
    assert!(string.get().interned());
    assert!(string.get().as_str().starts_with("x0123456789"));
}

#[test]
fn arrays_push_and_pop() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let array = scope.local(Array::make(&mut ctx));

    for n in 0..40 {
        let value = scope.local(ctx.get_integer(n));
        Array::push(array.handle(), &mut ctx, value.handle());
    }
    assert_eq!(array.get().len(), 40);
    assert!(array.get().capacity() >= 40);
    assert!(array.get().get(17).same(ctx.get_integer(17)));

    assert!(array.get().pop().same(ctx.get_integer(39)));
    assert_eq!(array.get().len(), 39);

    let empty = scope.local(Array::make(&mut ctx));
    assert!(empty.get().pop().is_null());
}

#[test]
fn dynamic_object_properties() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let object = scope.local(DynamicObject::make(&mut ctx));

    let name = scope.local(ctx.get_symbol("field"));
    let value = scope.local(ctx.get_integer(17));
    DynamicObject::set(object.handle(), &mut ctx, name.handle(), value.handle().erased());
    assert!(object.get().get(name.get()).same(value.value()));

    let names = DynamicObject::names(object.handle(), &mut ctx);
    assert_eq!(names.len(), 1);

    // Storing null removes the property.
    let null = scope.local(Value::null());
    DynamicObject::set(object.handle(), &mut ctx, name.handle(), null.handle());
    assert!(object.get().get(name.get()).is_null());
}

#[test]
fn equality_is_cross_representation() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);

    let heap_five = scope.local(Integer::make(&mut ctx, 5));
    let float_five = scope.local(Float::make(&mut ctx, 5.0));
    let small_five = SmallInt::make(5).value();

    assert!(tiro_runtime::equal(small_five, heap_five.value()));
    assert!(tiro_runtime::equal(heap_five.value(), float_five.value()));
    assert!(tiro_runtime::equal(small_five, float_five.value()));
    assert!(!tiro_runtime::equal(small_five, Value::null()));
}
