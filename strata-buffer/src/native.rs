/// Plain fixed-width values that can be reinterpreted from raw little-endian bytes.
///
/// Every bit pattern of an implementing type is a valid value, which makes zeroed buffers and
/// byte reinterpretation sound.
pub trait NativeType: Copy + Default + Send + Sync + PartialEq + 'static + private::Sealed {}

mod private {
    pub trait Sealed {}
}

macro_rules! native_type {
    ($($T:ty),*) => {
        $(
            impl private::Sealed for $T {}
            impl NativeType for $T {}
        )*
    };
}

native_type!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);
