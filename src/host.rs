//! A dynamically typed host environment.
//!
//! Host values are [`Object`]s. Native functions are registered as overload
//! sets on a [`Module`], either as module functions or as methods of named
//! classes, and resolved at call time by converting each argument with
//! [`FromObject`].
//!
//! Overloads are kept sorted by the precedence rank of their parameter
//! types, so an argument that converts to more than one category binds to
//! the lowest rank: a scalar before a vector, a vector before a matrix. An
//! `N x 1` array therefore has vector semantics wherever both a vector and a
//! matrix overload exist, whatever order they were registered in.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ndarray::{Array1, Array2, ArrayD, Ix2};
use rustc_hash::FxHashMap;

use crate::errors::{ADError, Result};
use crate::function::Function;
use crate::node::{AbstractVariable, NodeId};
use crate::operation::Operation;
use crate::value::{Derivative, Elementwise};
use crate::variable::{Expression, Variable};
use crate::wrapper::ExpressionWrapper;

/// A host value.
#[derive(Clone, Debug)]
pub enum Object {
    None,
    Bool(bool),
    Float(f64),
    Str(String),
    Array(ArrayD<f64>),
    Tuple(Vec<Object>),
    Instance(Instance),
}

impl Object {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Object::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Host type name: the class of an instance, or the builtin kind.
    pub fn type_name(&self) -> &str {
        match self {
            Object::None => "None",
            Object::Bool(_) => "bool",
            Object::Float(_) => "float",
            Object::Str(_) => "str",
            Object::Array(_) => "array",
            Object::Tuple(_) => "tuple",
            Object::Instance(i) => i.class(),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::None, Object::None) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => a == b,
            (Object::Tuple(a), Object::Tuple(b)) => a == b,
            (Object::Instance(a), Object::Instance(b)) => Rc::ptr_eq(&a.data, &b.data),
            _ => false,
        }
    }
}

impl From<f64> for Object {
    fn from(x: f64) -> Self {
        Object::Float(x)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Object::Str(s.to_string())
    }
}

impl From<Array1<f64>> for Object {
    fn from(a: Array1<f64>) -> Self {
        Object::Array(a.into_dyn())
    }
}

impl From<Array2<f64>> for Object {
    fn from(a: Array2<f64>) -> Self {
        Object::Array(a.into_dyn())
    }
}

impl From<Vec<Object>> for Object {
    fn from(items: Vec<Object>) -> Self {
        Object::Tuple(items)
    }
}

impl From<Instance> for Object {
    fn from(instance: Instance) -> Self {
        Object::Instance(instance)
    }
}

/// An instance of a registered class wrapping a native value.
#[derive(Clone)]
pub struct Instance {
    class: Rc<str>,
    data: Rc<dyn Any>,
    node: Option<NodeId>,
}

impl Instance {
    pub fn new<T: Any>(class: impl Into<Rc<str>>, data: T, node: Option<NodeId>) -> Self {
        Self {
            class: class.into(),
            data: Rc::new(data),
            node,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Graph node of a variable instance.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        self.data.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "<{} {}>", self.class, node),
            None => write!(f, "<{}>", self.class),
        }
    }
}

/// Conversion of a host argument into a native parameter.
pub trait FromObject: Sized {
    /// Overload precedence of the parameter type; lower ranks are tried first.
    const RANK: u8 = 0;
    fn from_object(object: &Object) -> Option<Self>;
}

/// Conversion of a native result into a host value.
pub trait IntoObject {
    fn into_object(self) -> Object;
}

impl FromObject for Object {
    fn from_object(object: &Object) -> Option<Self> {
        Some(object.clone())
    }
}

impl IntoObject for Object {
    fn into_object(self) -> Object {
        self
    }
}

impl FromObject for f64 {
    fn from_object(object: &Object) -> Option<Self> {
        object.as_float()
    }
}

impl IntoObject for f64 {
    fn into_object(self) -> Object {
        Object::Float(self)
    }
}

impl FromObject for bool {
    fn from_object(object: &Object) -> Option<Self> {
        object.as_bool()
    }
}

impl IntoObject for bool {
    fn into_object(self) -> Object {
        Object::Bool(self)
    }
}

impl IntoObject for String {
    fn into_object(self) -> Object {
        Object::Str(self)
    }
}

impl IntoObject for &'static str {
    fn into_object(self) -> Object {
        Object::from(self)
    }
}

impl IntoObject for () {
    fn into_object(self) -> Object {
        Object::None
    }
}

/// A 1-D array, or a 2-D array with a single column.
impl FromObject for Array1<f64> {
    const RANK: u8 = 1;
    fn from_object(object: &Object) -> Option<Self> {
        let array = object.as_array()?;
        match array.shape() {
            [_] | [_, 1] => Some(array.iter().copied().collect()),
            _ => None,
        }
    }
}

impl IntoObject for Array1<f64> {
    fn into_object(self) -> Object {
        self.into()
    }
}

/// Any 2-D array. A 1-D array becomes a single column.
impl FromObject for Array2<f64> {
    const RANK: u8 = 2;
    fn from_object(object: &Object) -> Option<Self> {
        let array = object.as_array()?;
        match array.shape() {
            [n] => Array2::from_shape_vec((*n, 1), array.iter().copied().collect()).ok(),
            [_, _] => array.clone().into_dimensionality::<Ix2>().ok(),
            _ => None,
        }
    }
}

impl IntoObject for Array2<f64> {
    fn into_object(self) -> Object {
        self.into()
    }
}

impl<T: FromObject> FromObject for Vec<T> {
    const RANK: u8 = T::RANK;
    fn from_object(object: &Object) -> Option<Self> {
        match object {
            Object::Tuple(items) => items.iter().map(T::from_object).collect(),
            _ => None,
        }
    }
}

impl<T: IntoObject> IntoObject for Vec<T> {
    fn into_object(self) -> Object {
        Object::Tuple(self.into_iter().map(IntoObject::into_object).collect())
    }
}

/// A value category exposed to the host.
pub trait Category: Elementwise + Default + FromObject + IntoObject {
    /// Class name prefix, e.g. `Vector` for `VectorVariable`.
    const NAME: &'static str;
}

impl Category for f64 {
    const NAME: &'static str = "Scalar";
}

impl Category for Array1<f64> {
    const NAME: &'static str = "Vector";
}

impl Category for Array2<f64> {
    const NAME: &'static str = "Matrix";
}

/// A derivative type exposed to the host.
pub trait Gradient: Derivative + FromObject + IntoObject {}

impl Gradient for f64 {}
impl Gradient for Array2<f64> {}

pub(crate) fn operation_class<V: Category>() -> String {
    format!("{}Operation", V::NAME)
}

pub(crate) fn variable_class<V: Category>() -> String {
    format!("{}Variable", V::NAME)
}

pub(crate) fn expression_class<V: Category>() -> String {
    format!("{}Expression", V::NAME)
}

/// Operations and variables of the category, as one expression handle.
impl<V: Category, D: Gradient> FromObject for ExpressionWrapper<V, D> {
    const RANK: u8 = V::RANK;
    fn from_object(object: &Object) -> Option<Self> {
        let instance = object.as_instance()?;
        if let Some(operation) = instance.downcast_ref::<Operation<V, D>>() {
            return Some(operation.wrapper());
        }
        instance
            .downcast_ref::<Variable<V, D>>()
            .map(Expression::wrapper)
    }
}

impl<V: Category, D: Gradient> FromObject for Rc<Variable<V, D>> {
    const RANK: u8 = V::RANK;
    fn from_object(object: &Object) -> Option<Self> {
        object.as_instance()?.downcast::<Variable<V, D>>()
    }
}

impl<V: Category, D: Gradient> IntoObject for Variable<V, D> {
    fn into_object(self) -> Object {
        let node = Some(self.node());
        Instance::new(variable_class::<V>(), self, node).into()
    }
}

impl<V: Category, D: Gradient> IntoObject for Operation<V, D> {
    fn into_object(self) -> Object {
        Instance::new(operation_class::<V>(), self, None).into()
    }
}

impl FromObject for Rc<RefCell<Function>> {
    fn from_object(object: &Object) -> Option<Self> {
        object.as_instance()?.downcast::<RefCell<Function>>()
    }
}

impl IntoObject for Function {
    fn into_object(self) -> Object {
        Instance::new("Function", RefCell::new(self), None).into()
    }
}

/// A variable of any category, known only by its node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnyVariable(pub NodeId);

impl AbstractVariable for AnyVariable {
    fn node(&self) -> NodeId {
        self.0
    }
}

impl FromObject for AnyVariable {
    fn from_object(object: &Object) -> Option<Self> {
        object.as_instance()?.node().map(AnyVariable)
    }
}

/// Either a tuple of variables or a single variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableSet(pub Vec<AnyVariable>);

impl VariableSet {
    pub fn as_dyn(&self) -> Vec<&dyn AbstractVariable> {
        self.0.iter().map(|v| v as &dyn AbstractVariable).collect()
    }
}

impl FromObject for VariableSet {
    fn from_object(object: &Object) -> Option<Self> {
        match object {
            Object::Tuple(_) => Vec::<AnyVariable>::from_object(object).map(VariableSet),
            _ => AnyVariable::from_object(object).map(|v| VariableSet(vec![v])),
        }
    }
}

/// A native function bindable as a host overload. `Args` is the tuple of
/// parameter types.
pub trait Callable<Args> {
    fn ranks() -> Vec<u8>;
    /// `None` if the arguments do not match the parameters.
    fn invoke(&self, args: &[Object]) -> Option<Result<Object>>;
}

impl<F, R> Callable<()> for F
where
    F: Fn() -> Result<R>,
    R: IntoObject,
{
    fn ranks() -> Vec<u8> {
        Vec::new()
    }

    fn invoke(&self, args: &[Object]) -> Option<Result<Object>> {
        if !args.is_empty() {
            return None;
        }
        Some(self().map(IntoObject::into_object))
    }
}

macro_rules! impl_callable {
    ($($A:ident => $i:tt),+) => {
        impl<F, R, $($A),+> Callable<($($A,)+)> for F
        where
            F: Fn($($A),+) -> Result<R>,
            R: IntoObject,
            $($A: FromObject),+
        {
            fn ranks() -> Vec<u8> {
                vec![$(<$A as FromObject>::RANK),+]
            }

            fn invoke(&self, args: &[Object]) -> Option<Result<Object>> {
                if args.len() != [$($i),+].len() {
                    return None;
                }
                let result = self($(<$A as FromObject>::from_object(&args[$i])?),+);
                Some(result.map(IntoObject::into_object))
            }
        }
    };
}

impl_callable!(A => 0);
impl_callable!(A => 0, B => 1);
impl_callable!(A => 0, B => 1, C => 2);

type Invoke = dyn Fn(&[Object]) -> Option<Result<Object>>;

#[derive(Clone)]
struct Overload {
    ranks: Vec<u8>,
    call: Rc<Invoke>,
}

impl Overload {
    fn new<Args, F>(f: F) -> Self
    where
        F: Callable<Args> + 'static,
    {
        Self {
            ranks: F::ranks(),
            call: Rc::new(move |args: &[Object]| f.invoke(args)),
        }
    }
}

#[derive(Clone, Default)]
struct OverloadSet(Vec<Overload>);

impl OverloadSet {
    /// Inserts after every overload of lower or equal rank.
    fn insert(&mut self, overload: Overload) {
        let at = self.0.partition_point(|o| o.ranks <= overload.ranks);
        self.0.insert(at, overload);
    }

    fn dispatch(&self, args: &[Object]) -> Option<Result<Object>> {
        self.0.iter().find_map(|o| (o.call)(args))
    }

    fn ranks(&self) -> Vec<Vec<u8>> {
        self.0.iter().map(|o| o.ranks.clone()).collect()
    }
}

struct Class {
    bases: Vec<String>,
    doc: String,
    methods: FxHashMap<String, OverloadSet>,
}

/// A named collection of host functions and classes.
pub struct Module {
    name: String,
    doc: String,
    functions: FxHashMap<String, OverloadSet>,
    classes: FxHashMap<String, Class>,
    docs: FxHashMap<String, String>,
}

impl Module {
    pub fn new(name: &str, doc: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: doc.to_string(),
            functions: FxHashMap::default(),
            classes: FxHashMap::default(),
            docs: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an overload to the module function `name`.
    pub fn def<Args, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Callable<Args> + 'static,
    {
        self.functions
            .entry(name.to_string())
            .or_default()
            .insert(Overload::new(f));
        self
    }

    /// Declares a class. Declaring an existing class again is a no-op.
    pub fn add_class(&mut self, name: &str, bases: &[&str], doc: &str) -> &mut Self {
        self.classes.entry(name.to_string()).or_insert_with(|| Class {
            bases: bases.iter().map(|b| b.to_string()).collect(),
            doc: doc.to_string(),
            methods: FxHashMap::default(),
        });
        self
    }

    /// Adds an overload to the method `name` of `class`. The receiver is the
    /// first parameter.
    pub fn def_method<Args, F>(&mut self, class: &str, name: &str, f: F) -> &mut Self
    where
        F: Callable<Args> + 'static,
    {
        self.classes
            .entry(class.to_string())
            .or_insert_with(|| Class {
                bases: Vec::new(),
                doc: String::new(),
                methods: FxHashMap::default(),
            })
            .methods
            .entry(name.to_string())
            .or_default()
            .insert(Overload::new(f));
        self
    }

    /// Attaches a doc string to a function, or to `Class.method`.
    pub fn set_doc(&mut self, name: &str, doc: &str) -> &mut Self {
        self.docs.insert(name.to_string(), doc.to_string());
        self
    }

    /// Doc string of the module (empty name), a class, a function or a
    /// `Class.method`.
    pub fn doc(&self, name: &str) -> Option<&str> {
        if name.is_empty() {
            return Some(&self.doc);
        }
        if let Some(class) = self.classes.get(name) {
            return Some(&class.doc);
        }
        self.docs.get(name).map(String::as_str)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Parameter ranks of the overloads of a module function, in the order
    /// they are tried.
    pub fn overload_ranks(&self, name: &str) -> Vec<Vec<u8>> {
        self.functions
            .get(name)
            .map(OverloadSet::ranks)
            .unwrap_or_default()
    }

    /// Method resolution order: the class, then its bases depth first.
    pub fn mro(&self, class: &str) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut pending = vec![class.to_string()];
        while let Some(name) = pending.pop() {
            if order.contains(&name) {
                continue;
            }
            if let Some(c) = self.classes.get(&name) {
                pending.extend(c.bases.iter().rev().cloned());
            }
            order.push(name);
        }
        order
    }

    /// Whether `object` is an instance of `class` or of a subclass.
    pub fn isinstance(&self, object: &Object, class: &str) -> bool {
        object
            .as_instance()
            .is_some_and(|i| self.mro(i.class()).iter().any(|c| c == class))
    }

    /// Calls a module function.
    pub fn call(&self, name: &str, args: &[Object]) -> Result<Object> {
        self.functions
            .get(name)
            .and_then(|set| set.dispatch(args))
            .unwrap_or_else(|| {
                Err(ADError::NoMatchingOverload {
                    name: name.to_string(),
                })
            })
    }

    /// Constructs an instance of `class` through its constructor overloads.
    pub fn new_instance(&self, class: &str, args: &[Object]) -> Result<Object> {
        if !self.has_class(class) {
            return Err(ADError::TypeError(format!("unknown class '{}'", class)));
        }
        self.call(class, args)
    }

    fn try_method(&self, receiver: &Object, name: &str, args: &[Object]) -> Option<Result<Object>> {
        let instance = receiver.as_instance()?;
        let set = self
            .mro(instance.class())
            .iter()
            .find_map(|c| self.classes.get(c).and_then(|c| c.methods.get(name)))?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(receiver.clone());
        full.extend_from_slice(args);
        set.dispatch(&full)
    }

    /// Calls a method of `receiver`'s class or of its bases.
    pub fn call_method(&self, receiver: &Object, name: &str, args: &[Object]) -> Result<Object> {
        if receiver.as_instance().is_none() {
            return Err(ADError::TypeError(format!(
                "'{}' object has no attribute '{}'",
                receiver.type_name(),
                name
            )));
        }
        self.try_method(receiver, name, args).unwrap_or_else(|| {
            Err(ADError::NoMatchingOverload {
                name: format!("{}.{}", receiver.type_name(), name),
            })
        })
    }

    /// Calls an instance, `obj(*args)`.
    pub fn call_instance(&self, receiver: &Object, args: &[Object]) -> Result<Object> {
        self.call_method(receiver, "__call__", args)
    }

    /// Applies the infix operator `name` (`add`, `matmul`, ...), trying
    /// `lhs.__name__(rhs)` and then `rhs.__rname__(lhs)`.
    pub fn binary_op(&self, name: &str, lhs: &Object, rhs: &Object) -> Result<Object> {
        let forward = format!("__{}__", name);
        if let Some(result) = self.try_method(lhs, &forward, std::slice::from_ref(rhs)) {
            return result;
        }
        let reflected = format!("__r{}__", name);
        if let Some(result) = self.try_method(rhs, &reflected, std::slice::from_ref(lhs)) {
            return result;
        }
        Err(ADError::NoMatchingOverload { name: forward })
    }

    /// Applies the prefix operator `name` (`neg`).
    pub fn unary_op(&self, name: &str, operand: &Object) -> Result<Object> {
        self.call_method(operand, &format!("__{}__", name), &[])
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        let mut classes: Vec<&String> = self.classes.keys().collect();
        classes.sort();
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("functions", &functions)
            .field("classes", &classes)
            .finish()
    }
}
