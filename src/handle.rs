use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

use static_assertions::const_assert;

use crate::counter::{acquire, release, Count, Counter, RefCounted};

/// A handle owning one unit of reference on a managed value, or null.
///
/// Copying a handle increments the pointee's embedded count; dropping it
/// decrements the count and destroys the pointee on the zero transition.
/// The element type may be a trait object, which is how a handle to a
/// concrete type widens to a handle to one of its traits (see
/// [`upcast!`](crate::upcast)).
pub struct Shared<T: ?Sized + RefCounted> {
    ptr: Option<NonNull<T>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: ?Sized + RefCounted + Send + Sync> Send for Shared<T> {}
unsafe impl<T: ?Sized + RefCounted + Send + Sync> Sync for Shared<T> {}

struct SizeProbe {
    refs: Counter,
}

unsafe impl RefCounted for SizeProbe {
    type Counter = Counter;

    fn counter(&self) -> &Counter {
        &self.refs
    }
}

// Ensure the handle stays exactly one raw pointer wide.
const_assert!(mem::size_of::<Shared<SizeProbe>>() == mem::size_of::<*mut SizeProbe>());

impl<T: ?Sized + RefCounted> Shared<T> {
    /// The null handle.
    #[inline]
    pub const fn null() -> Self {
        Shared {
            ptr: None,
            _marker: PhantomData,
        }
    }

    /// Moves `value` onto the heap and returns the first handle to it.
    ///
    /// One allocation; the fresh count goes zero to one.
    #[inline]
    pub fn new(value: T) -> Self
    where
        T: Sized,
    {
        let ptr = NonNull::from(Box::leak(Box::new(value)));
        acquire(unsafe { ptr.as_ref() });
        Shared {
            ptr: Some(ptr),
            _marker: PhantomData,
        }
    }

    /// Binds an additional handle to `ptr`, incrementing the count.
    ///
    /// This is how a raw pointer to a live managed value (say, `self`
    /// inside one of its methods) is turned back into an owner. A null
    /// `ptr` yields the null handle.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to a live value managed by this
    /// protocol: `Box`-allocated, count driven only by handle traffic.
    #[inline]
    pub unsafe fn from_ptr(ptr: *mut T) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => {
                acquire(ptr.as_ref());
                Shared {
                    ptr: Some(ptr),
                    _marker: PhantomData,
                }
            }
            None => Shared::null(),
        }
    }

    /// Adopts the unit of ownership produced by [`Shared::into_raw`].
    /// The count is not touched.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must carry exactly the one unit of reference that
    /// [`Shared::into_raw`] transferred out and that unit must not be
    /// adopted twice.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Shared {
            ptr: NonNull::new(ptr),
            _marker: PhantomData,
        }
    }

    /// Transfers this handle's unit of ownership out as a raw pointer.
    /// The count is not touched; the null handle yields the null pointer.
    #[inline]
    pub fn into_raw(self) -> *mut T
    where
        T: Sized,
    {
        let ptr = self.as_ptr();
        mem::forget(self);
        ptr
    }

    /// The raw pointer, null for the null handle. No count traffic.
    #[inline]
    pub fn as_ptr(&self) -> *mut T
    where
        T: Sized,
    {
        match self.ptr {
            Some(ptr) => ptr.as_ptr(),
            None => std::ptr::null_mut(),
        }
    }

    /// Checked access to the pointee.
    #[inline]
    pub fn as_ref(&self) -> Option<&T> {
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// `true` for the null handle.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The pointee's reference count; zero for the null handle.
    ///
    /// On the atomic flavor the value is a snapshot and may be stale as
    /// soon as it is read.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.as_ref().map_or(0, |value| value.counter().get())
    }

    /// Releases the current pointee, if any, and becomes null.
    #[inline]
    pub fn reset(&mut self) {
        *self = Shared::null();
    }

    /// Releases the current pointee and binds to `ptr` instead. The new
    /// pointee is acquired before the old one is released.
    ///
    /// # Safety
    ///
    /// Same contract as [`Shared::from_ptr`].
    #[inline]
    pub unsafe fn reset_to(&mut self, ptr: *mut T) {
        *self = Shared::from_ptr(ptr);
    }

    /// Moves the binding out, leaving this handle null. No count traffic.
    #[inline]
    pub fn take(&mut self) -> Self {
        mem::replace(self, Shared::null())
    }

    /// Exchanges the pointees of two handles. No count traffic.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
    }

    /// Address identity against a handle of any element type. Two handles
    /// are the same when they point at the same value, even if one of
    /// them was upcast to a trait object.
    #[inline]
    pub fn ptr_eq<U: ?Sized + RefCounted>(&self, other: &Shared<U>) -> bool {
        self.data() == other.data()
    }

    /// The pointee address with any trait-object metadata discarded.
    #[inline]
    fn data(&self) -> *mut u8 {
        match self.ptr {
            Some(ptr) => ptr.as_ptr() as *mut u8,
            None => std::ptr::null_mut(),
        }
    }
}

impl<T: ?Sized + RefCounted> Clone for Shared<T> {
    /// Binds one more handle to the pointee, incrementing its count. The
    /// null handle clones to the null handle.
    #[inline]
    fn clone(&self) -> Self {
        if let Some(value) = self.as_ref() {
            acquire(value);
        }
        Shared {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized + RefCounted> Drop for Shared<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr {
            unsafe { release(ptr.as_ptr()) };
        }
    }
}

impl<T: ?Sized + RefCounted> Default for Shared<T> {
    #[inline]
    fn default() -> Self {
        Shared::null()
    }
}

impl<T: ?Sized + RefCounted> Deref for Shared<T> {
    type Target = T;

    /// Panics on the null handle; use [`Shared::as_ref`] for checked
    /// access.
    #[inline]
    fn deref(&self) -> &T {
        self.as_ref().expect("dereferenced a null handle")
    }
}

impl<T: ?Sized + RefCounted, U: ?Sized + RefCounted> PartialEq<Shared<U>> for Shared<T> {
    /// Pointer identity, not pointee equality.
    #[inline]
    fn eq(&self, other: &Shared<U>) -> bool {
        self.data() == other.data()
    }
}

impl<T: ?Sized + RefCounted> Eq for Shared<T> {}

impl<T: ?Sized + RefCounted, U: ?Sized> PartialEq<*mut U> for Shared<T> {
    #[inline]
    fn eq(&self, other: &*mut U) -> bool {
        self.data() == *other as *mut u8
    }
}

impl<T: ?Sized + RefCounted, U: ?Sized> PartialEq<*const U> for Shared<T> {
    #[inline]
    fn eq(&self, other: &*const U) -> bool {
        self.data() == *other as *mut u8
    }
}

impl<T: ?Sized + RefCounted> Hash for Shared<T> {
    /// Hashes the address, consistent with the identity `Eq`.
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data().hash(state);
    }
}

impl<T: ?Sized + RefCounted> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&self.data()).finish()
    }
}

impl<T: ?Sized + RefCounted> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.data(), f)
    }
}

/// Widens a handle's element type: `Shared<U>` becomes `Shared<T>`
/// whenever `*mut U` coerces to `*mut T`, i.e. `T` is a trait object of a
/// trait that `U` implements.
///
/// The result points at the same value through the same embedded counter,
/// so no count moves. The source handle is consumed; upcast a clone to
/// keep the original binding:
///
/// ```
/// use intrusive_rc::{ref_counted, upcast, Counter, RefCounted, Shared};
///
/// trait Draw: RefCounted<Counter = Counter> {
///     fn draw(&self) -> &'static str;
/// }
///
/// struct Circle {
///     refs: Counter,
/// }
/// ref_counted!(Circle { refs: Counter });
///
/// impl Draw for Circle {
///     fn draw(&self) -> &'static str {
///         "circle"
///     }
/// }
///
/// let circle = Shared::new(Circle {
///     refs: Counter::new(),
/// });
/// let drawable: Shared<dyn Draw> = upcast!(circle.clone() => dyn Draw);
/// assert!(drawable == circle);
/// assert_eq!(drawable.ref_count(), 2);
/// assert_eq!(drawable.draw(), "circle");
/// ```
#[macro_export]
macro_rules! upcast {
    ($handle:expr => $target:ty) => {{
        let raw = $crate::Shared::into_raw($handle);
        // A raw-pointer `as` cast only compiles for a real unsizing
        // coercion, so the element types stay checked.
        unsafe { $crate::Shared::<$target>::from_raw(raw as *mut $target) }
    }};
}
