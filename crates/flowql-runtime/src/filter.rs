//! `where expr` (spec §4.2/§4.3/§4.4, testable property 6).

use async_trait::async_trait;
use flowql_core::record::{truthy, Record};
use flowql_lang::expr::{eval, Env, Expr};

use crate::stage::Stage;

pub struct Filter {
    predicate: Expr,
}

impl Filter {
    pub fn new(predicate: Expr) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl Stage for Filter {
    async fn process(&mut self, record: Record) -> Vec<Record> {
        let env = Env::new(&record);
        let passed = eval(&self.predicate, &env).map(|v| truthy(&v)).unwrap_or(false);
        if passed {
            vec![record]
        } else {
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowql_lang::expr::{BinaryOp, Expr};
    use serde_json::json;

    #[tokio::test]
    async fn where_true_forwards_every_record() {
        let mut filter = Filter::new(Expr::Bool(true));
        let out = filter.process(json!({"name": "A"})).await;
        assert_eq!(out, vec![json!({"name": "A"})]);
    }

    #[tokio::test]
    async fn age_gt_18_drops_younger_rows() {
        let predicate = Expr::Binary(BinaryOp::Gt, Box::new(Expr::Identifier("age".into())), Box::new(Expr::Number(18.0)));
        let mut filter = Filter::new(predicate);
        assert_eq!(filter.process(json!({"age": 25})).await, vec![json!({"age": 25})]);
        assert!(filter.process(json!({"age": 16})).await.is_empty());
    }

    #[tokio::test]
    async fn absent_predicate_result_is_falsy() {
        let mut filter = Filter::new(Expr::Identifier("missing".into()));
        assert!(filter.process(json!({})).await.is_empty());
    }
}
