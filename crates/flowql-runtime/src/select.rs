//! `select`/`project` (spec §4.2/§4.3, testable property 5). The parser
//! already unifies both keywords into one CST node, so there's only one
//! stage here — `project` never existed past lowering.

use async_trait::async_trait;
use flowql_core::record::Record;
use flowql_lang::expr::{eval, Env, Expr, ObjectProp};

use crate::stage::Stage;

pub struct Select {
    /// The property list wrapped as a single object-constructor expression,
    /// so the projector reuses the evaluator's own spread/exclude/order
    /// semantics verbatim instead of re-implementing them here.
    projector: Expr,
}

impl Select {
    pub fn new(props: Vec<ObjectProp>) -> Self {
        Self { projector: Expr::Object(props) }
    }
}

#[async_trait]
impl Stage for Select {
    async fn process(&mut self, record: Record) -> Vec<Record> {
        let env = Env::new(&record);
        match eval(&self.projector, &env) {
            Some(projected) => vec![projected],
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn strips_fields_not_named() {
        let mut select = Select::new(vec![
            ObjectProp::KeyValue("name".into(), Expr::Identifier("name".into())),
            ObjectProp::KeyValue("age".into(), Expr::Identifier("age".into())),
            ObjectProp::KeyValue("email".into(), Expr::Identifier("email".into())),
        ]);
        let out = select
            .process(json!({"name":"John","age":30,"email":"j@x","password":"p","ssn":"s"}))
            .await;
        assert_eq!(out, vec![json!({"name":"John","age":30,"email":"j@x"})]);
    }

    #[tokio::test]
    async fn spread_all_then_override_then_exclude() {
        let mut select = Select::new(vec![
            ObjectProp::SpreadAll,
            ObjectProp::KeyValue(
                "full_name".into(),
                Expr::Binary(
                    flowql_lang::expr::BinaryOp::Add,
                    Box::new(Expr::Identifier("name".into())),
                    Box::new(Expr::Binary(
                        flowql_lang::expr::BinaryOp::Add,
                        Box::new(Expr::String(" ".into())),
                        Box::new(Expr::Identifier("surname".into())),
                    )),
                ),
            ),
            ObjectProp::Exclude("password".into()),
        ]);
        let out = select
            .process(json!({"name":"A","surname":"B","password":"p","age":1}))
            .await;
        assert_eq!(out, vec![json!({"name":"A","surname":"B","age":1,"full_name":"A B"})]);
    }
}
