use std::collections::HashMap;

use remindee_script::Expr;

use crate::err::Error;

/// A user-defined function from FSET.  Arity is fixed at definition;
/// the body is re-evaluated against a frame of the actual arguments.
#[derive(Debug, Clone)]
pub struct UserFunc {
    pub name: String,
    pub args: Vec<String>,
    pub body: Expr,
    pub is_constant: bool,
    pub filename: String,
    pub line: u32,
    /// Call-in-progress marker for direct-recursion detection.
    pub recursing: bool,
}

#[derive(Debug, Default)]
pub struct FuncStore {
    funcs: HashMap<String, UserFunc>,
    stack: Vec<Vec<(String, Option<UserFunc>)>>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl FuncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, func: UserFunc) {
        self.funcs.insert(key(&func.name), func);
    }

    pub fn get(&self, name: &str) -> Option<&UserFunc> {
        self.funcs.get(&key(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut UserFunc> {
        self.funcs.get_mut(&key(name))
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        self.funcs.remove(&key(name)).is_some()
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), Error> {
        let mut func = self
            .funcs
            .remove(&key(old))
            .ok_or_else(|| Error::UndefinedFunction(old.to_owned()))?;
        func.name = new.to_owned();
        self.funcs.insert(key(new), func);
        Ok(())
    }

    pub fn push(&mut self, names: &[String]) {
        let frame = names
            .iter()
            .map(|name| (key(name), self.funcs.get(&key(name)).cloned()))
            .collect();
        self.stack.push(frame);
    }

    pub fn push_all(&mut self) {
        let frame = self
            .funcs
            .iter()
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        self.stack.push(frame);
    }

    pub fn pop(&mut self) -> Result<(), Error> {
        let frame = self.stack.pop().ok_or(Error::PopWithoutPush)?;
        for (name, saved) in frame {
            match saved {
                Some(func) => {
                    self.funcs.insert(name, func);
                }
                None => {
                    self.funcs.remove(&name);
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UserFunc)> {
        self.funcs.iter()
    }
}
