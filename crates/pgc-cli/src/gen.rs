//! Starter-code generation.
//!
//! `pgccmd gen init StructName shortName` prints a module with a record
//! type, CRUD helpers and a test skeleton to paste into a project.

pub(crate) fn generate(args: &[String]) -> anyhow::Result<String> {
    if args.len() != 5 || args[2] != "init" {
        anyhow::bail!("gen currently only supports `$ pgccmd gen init StructName shortName`");
    }
    Ok(render_init(&args[3], &args[4]))
}

fn render_init(struct_name: &str, short_name: &str) -> String {
    format!(
        r#"// -------------------------------------------- //
// AUTO GENERATED - place in a new models file
// -------------------------------------------- //

use chrono::Utc;
use pgc::{{Adapter, GenericClient, Record}};

#[derive(Debug, Clone, Default, Record)]
pub struct {struct_name} {{
    pub id: String,
    pub name: String,
    pub description: String,
    pub created: chrono::NaiveDateTime,
    pub updated: chrono::NaiveDateTime,
}}

impl {struct_name} {{
    pub fn new(id: impl Into<String>) -> Self {{
        Self {{
            id: id.into(),
            ..Default::default()
        }}
    }}

    pub async fn get<C: GenericClient>(
        adapter: &Adapter<C>,
        id: impl Into<String>,
    ) -> pgc::PgcResult<Option<Self>> {{
        let mut {short_name} = Self::new(id);
        let found = adapter.get(&mut {short_name}, vec![]).await?;
        Ok(found.then_some({short_name}))
    }}

    pub async fn insert<C: GenericClient>(&mut self, adapter: &Adapter<C>) -> pgc::PgcResult<()> {{
        self.created = Utc::now().naive_utc();
        self.updated = self.created;
        adapter.insert(std::slice::from_ref(self)).await
    }}

    pub async fn update<C: GenericClient>(&mut self, adapter: &Adapter<C>) -> pgc::PgcResult<()> {{
        self.updated = Utc::now().naive_utc();
        adapter.update(self).await
    }}

    pub async fn delete<C: GenericClient>(&self, adapter: &Adapter<C>) -> pgc::PgcResult<()> {{
        adapter.delete(self).await
    }}
}}

// -------------------------------------------- //
// AUTO GENERATED - place in a new tests file
// -------------------------------------------- //

#[cfg(test)]
mod tests {{
    use super::*;

    #[tokio::test]
    async fn {short_name}_crud() {{
        let Ok(url) = std::env::var("PGC_TEST_DATABASE_URL") else {{
            eprintln!("PGC_TEST_DATABASE_URL not set, skipping");
            return;
        }};
        let pool = pgc::create_pool_with_url(&url).expect("pool");
        let adapter = Adapter::new(pgc::PoolClient::acquire(&pool).await.expect("client"));
        adapter.create_table::<{struct_name}>().await.expect("create table");

        let mut {short_name} = {struct_name}::new("fill-in-an-id");
        // Fill in the remaining fields here.
        {short_name}.insert(&adapter).await.expect("insert");

        let found = {struct_name}::get(&adapter, &{short_name}.id)
            .await
            .expect("get")
            .expect("row should exist");
        assert_eq!(found.id, {short_name}.id);

        // Make some changes here, then:
        {short_name}.update(&adapter).await.expect("update");
        {short_name}.delete(&adapter).await.expect("delete");
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn generate_requires_the_init_form() {
        assert!(generate(&args(&["pgccmd", "gen"])).is_err());
        assert!(generate(&args(&["pgccmd", "gen", "schema", "X", "x"])).is_err());
    }

    #[test]
    fn generated_module_names_the_struct() {
        let out = generate(&args(&["pgccmd", "gen", "init", "Address", "addr"])).expect("gen");
        assert!(out.contains("pub struct Address"));
        assert!(out.contains("async fn addr_crud"));
        assert!(out.contains("derive(Debug, Clone, Default, Record)"));
    }
}
