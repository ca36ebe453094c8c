use serde_json::Value;

/// 合并策略：把来源的新值与当前配置值合并
pub trait MergeStrategy: Send + Sync {
    fn can_handle(&self, name: &str) -> bool;

    fn apply(&self, existing: Option<&Value>, incoming: &Value) -> Value;
}

/// 直接使用新值
pub struct ReplaceStrategy;

impl MergeStrategy for ReplaceStrategy {
    fn can_handle(&self, name: &str) -> bool {
        name == "replace"
    }

    fn apply(&self, _existing: Option<&Value>, incoming: &Value) -> Value {
        incoming.clone()
    }
}

/// 只合并顶层 key，嵌套对象整体替换
pub struct MergeShallowStrategy;

impl MergeStrategy for MergeShallowStrategy {
    fn can_handle(&self, name: &str) -> bool {
        name == "merge-shallow"
    }

    fn apply(&self, existing: Option<&Value>, incoming: &Value) -> Value {
        match (existing, incoming) {
            (Some(Value::Object(base)), Value::Object(overlay)) => {
                let mut merged = base.clone();
                for (k, v) in overlay {
                    merged.insert(k.clone(), v.clone());
                }
                Value::Object(merged)
            }
            _ => incoming.clone(),
        }
    }
}

/// 对象递归合并，数组拼接（不去重）
pub struct MergeDeepStrategy;

impl MergeStrategy for MergeDeepStrategy {
    fn can_handle(&self, name: &str) -> bool {
        name == "merge-deep"
    }

    fn apply(&self, existing: Option<&Value>, incoming: &Value) -> Value {
        merge_deep(existing, incoming)
    }
}

fn merge_deep(existing: Option<&Value>, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Some(Value::Array(base)), Value::Array(extra)) => {
            Value::Array(base.iter().chain(extra.iter()).cloned().collect())
        }
        (Some(Value::Object(base)), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (k, v) in overlay {
                let value = merge_deep(base.get(k), v);
                merged.insert(k.clone(), value);
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

/// 按名称分发合并策略，找不到时按 replace 处理
pub struct MergeRegistry {
    strategies: Vec<Box<dyn MergeStrategy>>,
}

impl Default for MergeRegistry {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ReplaceStrategy),
            Box::new(MergeShallowStrategy),
            Box::new(MergeDeepStrategy),
        ])
    }
}

impl MergeRegistry {
    pub fn new(strategies: Vec<Box<dyn MergeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn apply(&self, strategy: &str, existing: Option<&Value>, incoming: &Value) -> Value {
        match self.strategies.iter().find(|s| s.can_handle(strategy)) {
            Some(s) => s.apply(existing, incoming),
            None => incoming.clone(),
        }
    }
}
